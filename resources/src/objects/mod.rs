pub mod compute_environment;
pub mod instance_type;
pub mod job;
pub mod job_definition;
pub mod result;
