// Copyright 2022-2024 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::cmd;
use crate::options::ConfigArgs;

cmd! {
  ConfigArgs(self, settings) {
    println!("{settings:?}");
    Ok(())
  }
}
