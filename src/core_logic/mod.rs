pub mod data_processing;
