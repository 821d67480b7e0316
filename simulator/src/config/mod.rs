pub mod sim_config;
