//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Test harness for the GaSVGA driver core: a behavioural model of the
//! VMSVGA device plus helpers shared by the integration tests.
pub mod device;
pub mod utils;

pub use self::device::{ExecutedCmd, TestDevice, TestDeviceConfig};
pub use self::utils::{Notification, TestBench, TestNotify};
