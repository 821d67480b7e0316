pub mod generator;
pub mod random;
pub mod trace_reader;
pub mod trace_writer;
pub mod workload_type;
