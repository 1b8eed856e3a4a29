/////////////////////////////////////////////////////////////////////////////////////////////
//
// Defines numerical thresholds shared across the repulsor crates.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

/// Faces with area below this threshold are treated as degenerate and
/// skipped by the energy evaluators.
pub const DEGENERATE_FACE_AREA: f64 = 1e-12;

/// Squared distances below this threshold are treated as coincident points;
/// kernel evaluations between them are zero.
pub const COINCIDENT_DISTANCE_SQ: f64 = 1e-30;

/// Default Barnes-Hut separation parameter.
pub const DEFAULT_SEPARATION: f64 = 0.25;
