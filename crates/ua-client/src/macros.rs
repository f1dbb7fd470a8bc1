// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Declarative helpers for wire structures.
//!
//! OPC UA structures are encoded as their fields in declaration order, and
//! enumerations as a 32-bit integer, so both codec directions can be derived
//! from the declaration itself.

/// Declares a structure and its binary codec (fields in declaration order).
macro_rules! ua_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $(#[$fmeta:meta])* $fvis:vis $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Default)]
        $vis struct $name {
            $( $(#[$fmeta])* $fvis $field: $ty, )*
        }

        impl $crate::codec::BinaryEncode for $name {
            #[allow(unused_variables)]
            fn encode(&self, enc: &mut $crate::codec::Encoder) -> $crate::error::CodecResult<()> {
                $( $crate::codec::BinaryEncode::encode(&self.$field, enc)?; )*
                Ok(())
            }
        }

        impl $crate::codec::BinaryDecode for $name {
            #[allow(unused_variables)]
            fn decode(dec: &mut $crate::codec::Decoder<'_>) -> $crate::error::CodecResult<Self> {
                Ok(Self {
                    $( $field: $crate::codec::BinaryDecode::decode(dec)?, )*
                })
            }
        }
    };
}

/// Declares an Int32-encoded enumeration.
macro_rules! ua_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:expr ),+ $(,)?
        }
        default = $default:ident;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }

        impl $name {
            /// Returns the wire value.
            pub const fn value(self) -> i32 {
                match self {
                    $( Self::$variant => $value, )+
                }
            }

            /// Looks up a variant by wire value.
            pub fn from_value(value: i32) -> Option<Self> {
                match value {
                    $( v if v == $value => Some(Self::$variant), )+
                    _ => None,
                }
            }
        }

        impl $crate::codec::BinaryEncode for $name {
            fn encode(&self, enc: &mut $crate::codec::Encoder) -> $crate::error::CodecResult<()> {
                enc.write_i32(self.value());
                Ok(())
            }
        }

        impl $crate::codec::BinaryDecode for $name {
            fn decode(dec: &mut $crate::codec::Decoder<'_>) -> $crate::error::CodecResult<Self> {
                let raw = dec.read_i32()?;
                Self::from_value(raw).ok_or_else(|| {
                    $crate::error::CodecError::invalid_value(
                        stringify!($name),
                        format!("unknown value {}", raw),
                    )
                })
            }
        }
    };
}

/// Binds a structure to its namespace-0 binary encoding id.
macro_rules! extension_type {
    ($( $ty:ty => $id:expr ),+ $(,)?) => {
        $(
            impl $crate::codec::ExtensionType for $ty {
                fn binary_encoding_id() -> $crate::types::NodeId {
                    $crate::types::NodeId::numeric(0, $id)
                }
            }
        )+
    };
}

/// Pairs a service request with its response and their encoding ids.
macro_rules! service {
    ($( $name:literal: $req:ident ($req_id:expr) => $res:ident ($res_id:expr) ),+ $(,)?) => {
        $(
            impl $crate::messages::ServiceRequest for $req {
                const ENCODING_ID: u32 = $req_id;
                const NAME: &'static str = $name;
                type Response = $res;

                fn request_header(&self) -> &$crate::messages::RequestHeader {
                    &self.request_header
                }

                fn request_header_mut(&mut self) -> &mut $crate::messages::RequestHeader {
                    &mut self.request_header
                }
            }

            impl $crate::messages::ServiceResponse for $res {
                const ENCODING_ID: u32 = $res_id;

                fn response_header(&self) -> &$crate::messages::ResponseHeader {
                    &self.response_header
                }

                fn response_header_mut(&mut self) -> &mut $crate::messages::ResponseHeader {
                    &mut self.response_header
                }
            }
        )+
    };
}
