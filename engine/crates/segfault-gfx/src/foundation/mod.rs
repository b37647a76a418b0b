pub mod device;
pub mod physical_device;
