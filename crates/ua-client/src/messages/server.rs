// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Server status structures.

use crate::types::ids::encoding_ids;
use crate::types::{DateTime, LocalizedText};

ua_enum! {
    /// Server run state.
    pub enum ServerState {
        /// Running.
        Running = 0,
        /// Failed.
        Failed = 1,
        /// No configuration.
        NoConfiguration = 2,
        /// Suspended.
        Suspended = 3,
        /// Shutting down.
        Shutdown = 4,
        /// Test mode.
        Test = 5,
        /// Communication fault.
        CommunicationFault = 6,
        /// Unknown.
        Unknown = 7,
    }
    default = Unknown;
}

ua_struct! {
    /// Product and build information.
    pub struct BuildInfo {
        /// Product URI.
        pub product_uri: String,
        /// Manufacturer.
        pub manufacturer_name: String,
        /// Product name.
        pub product_name: String,
        /// Software version.
        pub software_version: String,
        /// Build number.
        pub build_number: String,
        /// Build date.
        pub build_date: DateTime,
    }
}

ua_struct! {
    /// Value of the Server_ServerStatus variable.
    pub struct ServerStatusDataType {
        /// Start time.
        pub start_time: DateTime,
        /// Current time.
        pub current_time: DateTime,
        /// State.
        pub state: ServerState,
        /// Build information.
        pub build_info: BuildInfo,
        /// Seconds until shutdown.
        pub seconds_till_shutdown: u32,
        /// Shutdown reason.
        pub shutdown_reason: LocalizedText,
    }
}

extension_type! {
    BuildInfo => encoding_ids::BUILD_INFO,
    ServerStatusDataType => encoding_ids::SERVER_STATUS_DATA_TYPE,
}
