pub mod capsule;
pub mod decide;
pub mod init;
pub mod job;
pub mod keygen;
pub mod receipts;
