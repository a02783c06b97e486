pub mod chapters;
pub mod files;
pub mod pages;
pub mod quotas;
pub mod rate_limits;
pub mod series;
