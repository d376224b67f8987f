#![doc = include_str!("../README.md")]

pub mod component;
pub mod error;
pub mod graphics;
pub mod port;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub mod prelude {
    pub use crate::{
        component::{Component, ComponentHandle, HardwareBackend, Tunnel},
        error::{GraphicsError, HwError},
        graphics::{EglDisplay, EglImage, EglTarget, GraphicsApi, GraphicsContext, TextureId},
        port::{
            BufferFlags, BufferHeader, ComponentRole, ComponentState, EventKind, PortDefinition,
            PortDirection, PortIndex,
        },
    };
}
