pub mod audit_writer;
pub mod target_reader;
