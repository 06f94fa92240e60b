/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! # REST API Module
//!
//! Transport models and HTTP handlers for the TomyDB REST API.

pub mod handlers;
pub mod models;
