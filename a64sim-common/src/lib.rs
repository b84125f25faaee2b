// SPDX-FileCopyrightText: 2026 a64sim contributors
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod features;
pub mod types;

pub use features::{CpuFeature, CpuFeatures};
pub use types::*;
