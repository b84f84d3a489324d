pub mod monitored_service;
