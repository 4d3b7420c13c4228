//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod consts;
pub mod debug;
pub mod error;
pub mod flowmem;
pub mod lb;
pub mod learning;
pub mod liveness;
pub mod openflow;
pub mod packet;
pub mod reconciler;
pub mod registry;
pub mod switch;
pub mod transport;
