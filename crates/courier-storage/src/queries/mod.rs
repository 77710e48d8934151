// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed query modules, one per table group.

pub mod chips;
pub mod dead_letters;
pub mod deliveries;
pub mod jobs;
pub mod quotas;
pub mod windows;
