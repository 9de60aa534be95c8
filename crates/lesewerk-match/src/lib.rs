// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// lesewerk-match — Template field relocation for Lesewerk.
//
// Captures an ORB feature fingerprint from a template's source image, then
// finds that template in new documents via ratio-tested Hamming matching
// and a RANSAC homography, mapping every labelled field into the new
// document's pixel space.

pub mod features;
pub mod fingerprint;
pub mod homography;
pub mod matcher;

pub use features::{FeatureExtractor, FeatureSet, KeyPoint};
pub use fingerprint::{deserialize_fingerprint, serialize_fingerprint};
pub use homography::{Homography, transform_bounding_box};
pub use matcher::{TemplateMatcher, calculate_match_confidence};
