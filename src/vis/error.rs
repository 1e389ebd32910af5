// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with visibility sources.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisError {
    #[error("Data selection matched no rows: {0}")]
    InvalidSelection(String),

    #[error("Visibility buffer has inconsistent shapes: {0}")]
    BadShape(String),

    #[error("The visibility source is not locked; lock it before iterating")]
    NotLocked,

    #[error("The visibility source is read-only; cannot write model visibilities")]
    ReadOnly,

    #[error("There is no current visibility buffer; the iterator is exhausted")]
    NoBuffer,

    #[error("No antennas were supplied to the simulator")]
    NoAntennas,

    #[error("The simulator needs at least one timestep and one channel")]
    EmptySimulation,

    #[error("Couldn't serialise the virtual model record: {0}")]
    VirtualModel(#[from] serde_json::Error),
}
