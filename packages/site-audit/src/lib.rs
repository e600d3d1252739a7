// Site Audit - Access-Control Audit Engine
//
// Background jobs that walk a remote content site and record who can reach
// what: role assignments on webs, lists and items, plus sharing links.
//
// Job orchestration lives in kernel/jobs; the collection pipeline and its
// collaborator contracts live in domains/audit.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;

pub use config::*;
