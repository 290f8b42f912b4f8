pub mod ausbildung;
pub mod job_posting;
