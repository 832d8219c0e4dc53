pub mod altmetric;
pub mod arxiv;
