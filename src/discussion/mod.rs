//! Discussion board: queries, responses and votes.

pub mod queries;
pub mod responses;
pub mod votes;
