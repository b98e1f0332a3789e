pub mod contractdtos;
