// Scraping engine for German apprenticeship portals.
// A run walks search pages, loads each posting once, extracts fields with
// the portal's adapter and hands accepted postings to a JobStore.

pub mod chromium;
pub mod error;
pub mod extract;
pub mod navigator;
pub mod retry;
pub mod runner;
pub mod sites;
pub mod store;
pub mod text;
pub mod validation;

pub use error::ScrapeError;
pub use runner::{ScrapeRequest, ScrapeSettings, ScrapeSummary, scrape};
