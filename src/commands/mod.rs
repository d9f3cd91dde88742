pub mod patch;
pub mod verify;
