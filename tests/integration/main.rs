//! Integration tests: full scan cycles against an in-memory venue.

mod mock_venue;
mod scenarios;
