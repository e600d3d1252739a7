// Business domains
pub mod audit;
