//! Orchestrator tests driving a real control loop with fake collaborators

use super::test_helpers::*;
use super::*;
use crate::error::Error;
use crate::sources::FetchEvent;
use crate::types::{CancelReason, FailureReason, JobState, Link};
use std::sync::atomic::Ordering;
use std::time::Duration;
