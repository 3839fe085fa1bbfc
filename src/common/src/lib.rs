//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Self-contained utilities shared by the GaSVGA crates.
pub mod bitset;
pub mod fencecmp;

pub use self::bitset::IdBitmap;
pub use self::fencecmp::{fence_cmp32, fence_cmp64};
