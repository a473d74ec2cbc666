pub mod analysis;
pub mod decode;
pub mod master;
pub mod stretch;
pub mod sync;
pub mod wav;
