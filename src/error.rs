// Copyright 2024 by the timetabler authors
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use this file except in compliance with
// the License. You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! Error taxonomy of the scheduling pipeline, ordered roughly by severity. Configuration and
//! input errors abort the run before any solving happens; solver errors propagate to the caller;
//! export errors are logged by the caller and never corrupt the solved result in memory.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Missing or malformed configuration; raised at startup
    #[error("configuration error: {0}")]
    Config(String),

    /// A subject declares weekly minutes but the meeting bounds needed to derive its duration set
    /// are missing
    #[error("subject {subject_id} requires {required_weekly_minutes} weekly minutes but does not set min_meetings/max_meetings")]
    IncompleteMeetingBounds {
        subject_id: i64,
        required_weekly_minutes: u32,
    },

    /// A required input table could not be read or parsed
    #[error("could not read input table {table}: {source}")]
    Ingest {
        table: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Pass 1 found no solution even under the structural relaxation
    #[error("no feasible solution found under the structural relaxation (status {status})")]
    SolverInfeasible { status: String },

    /// An exporter failed; the solved result in memory stays valid
    #[error("export failed: {0}")]
    Export(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SchedulerError {
    pub fn ingest<E>(table: &str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        SchedulerError::Ingest {
            table: table.to_owned(),
            source: Box::new(source),
        }
    }
}
