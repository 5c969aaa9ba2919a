mod client;
pub mod error;
mod jobs;
mod reservations;

pub use client::{QueuedBuild, TeamCityClient};
pub use error::CiError;
pub use jobs::{spawn, CiJobs};
pub use reservations::{
    ci_owned_resources, teamcity_make_reservation, teamcity_release_reservation, used_for, CI_RESERVATION_USER,
};
