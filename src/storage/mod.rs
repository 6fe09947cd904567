pub mod layout;
pub mod file_lock;
pub mod mmap_file;
