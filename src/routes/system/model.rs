use serde::Serialize;

use crate::providers::Candidate;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<Candidate>,
    pub total: usize,
    pub free: usize,
    pub paid: usize,
}
