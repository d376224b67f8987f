//! Bring-up and teardown of component chains.

use std::sync::Arc;

use hwimg_component::{
    component::{Component, HardwareBackend, Tunnel},
    port::{ComponentRole, ComponentState, PortIndex},
};
use smallvec::SmallVec;

use crate::{config::PipelineTimeouts, error::PipelineError};

/// Components and tunnels of one built pipeline, in the order they were
/// created. Teardown walks them in reverse and never stops on an error.
#[derive(Default)]
pub(crate) struct Chain {
    components: SmallVec<[Arc<dyn Component>; 4]>,
    tunnels: SmallVec<[Box<dyn Tunnel>; 3]>,
}

impl Chain {
    pub fn is_empty(&self) -> bool {
        self.components.is_empty() && self.tunnels.is_empty()
    }

    /// Create a component and take ownership of it.
    pub fn create(
        &mut self,
        backend: &dyn HardwareBackend,
        role: ComponentRole,
    ) -> Result<Arc<dyn Component>, PipelineError> {
        let component = backend.create_component(role)?;
        tracing::debug!(component = ?component, backend = backend.name(), "component created");
        self.components.push(component.clone());
        Ok(component)
    }

    /// Tunnel `source`'s output into `sink`'s input.
    pub fn connect(
        &mut self,
        backend: &dyn HardwareBackend,
        source: &Arc<dyn Component>,
        sink: &Arc<dyn Component>,
        timeouts: &PipelineTimeouts,
    ) -> Result<(), PipelineError> {
        let mut tunnel = backend.create_tunnel(
            source,
            source.role().output_port(),
            sink,
            sink.role().input_port(),
        )?;
        let established = tunnel.establish(timeouts.port_command);
        let describe = tunnel.describe();
        self.tunnels.push(tunnel);
        established?;
        tracing::debug!(tunnel = %describe, "tunnel established");
        Ok(())
    }

    /// Stop, disable, untunnel, free and unload everything.
    pub fn teardown(&mut self, timeouts: &PipelineTimeouts) {
        if self.is_empty() {
            return;
        }
        for component in self.components.iter().rev() {
            if component.state() == ComponentState::Executing {
                log_failure(
                    component,
                    "stop",
                    component.set_state(ComponentState::Idle, timeouts.state_change),
                );
            }
        }
        for component in self.components.iter().rev() {
            for port in component.role().ports() {
                disable_if_enabled(component, port, timeouts);
            }
        }
        for mut tunnel in self.tunnels.drain(..).rev() {
            if let Err(err) = tunnel.teardown() {
                tracing::warn!(tunnel = %tunnel.describe(), error = %err, "tunnel teardown failed");
            }
        }
        for component in self.components.drain(..).rev() {
            for port in component.role().ports() {
                log_failure(&component, "free buffers", component.free_buffers(port));
            }
            if component.state() == ComponentState::Idle {
                log_failure(
                    &component,
                    "unload",
                    component.set_state(ComponentState::Loaded, timeouts.state_change),
                );
            }
            tracing::debug!(component = ?component, "component released");
        }
    }
}

impl Drop for Chain {
    fn drop(&mut self) {
        self.teardown(&PipelineTimeouts::default());
    }
}

fn disable_if_enabled(component: &Arc<dyn Component>, port: PortIndex, timeouts: &PipelineTimeouts) {
    match component.port_definition(port) {
        Ok(def) if def.enabled => log_failure(
            component,
            "disable port",
            component.disable_port(port, timeouts.port_command),
        ),
        Ok(_) => {}
        Err(err) => {
            tracing::warn!(component = ?component, port = %port, error = %err, "port query failed");
        }
    }
}

fn log_failure<E: std::fmt::Display>(
    component: &Arc<dyn Component>,
    step: &'static str,
    result: Result<(), E>,
) {
    if let Err(err) = result {
        tracing::warn!(component = ?component, step, error = %err, "teardown step failed");
    }
}

/// Loaded -> Idle -> Executing.
pub(crate) fn start(
    component: &Arc<dyn Component>,
    timeouts: &PipelineTimeouts,
) -> Result<(), PipelineError> {
    component.set_state(ComponentState::Idle, timeouts.state_change)?;
    component.set_state(ComponentState::Executing, timeouts.state_change)?;
    Ok(())
}

/// Enable every port of a component that is still in `Loaded`.
pub(crate) fn enable_ports(
    component: &Arc<dyn Component>,
    timeouts: &PipelineTimeouts,
) -> Result<(), PipelineError> {
    for port in component.role().ports() {
        component.enable_port(port, timeouts.port_command)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwimg_component::sim::{SimBackend, SimFaults};
    use std::time::Duration;

    #[test]
    fn teardown_releases_every_component() {
        let backend = SimBackend::new();
        let timeouts = PipelineTimeouts::uniform(Duration::from_millis(100));
        let mut chain = Chain::default();
        let decoder = chain.create(&backend, ComponentRole::ImageDecode).unwrap();
        let resize = chain.create(&backend, ComponentRole::Resize).unwrap();
        chain.connect(&backend, &decoder, &resize, &timeouts).unwrap();
        decoder
            .allocate_buffers(ComponentRole::ImageDecode.input_port())
            .unwrap();
        decoder
            .enable_port(ComponentRole::ImageDecode.input_port(), timeouts.port_command)
            .unwrap();
        start(&decoder, &timeouts).unwrap();
        drop((decoder, resize));
        assert_eq!(backend.live_components(), 2);

        chain.teardown(&timeouts);
        assert!(chain.is_empty());
        assert_eq!(backend.live_components(), 0);
    }

    #[test]
    fn teardown_survives_stalled_ports() {
        let backend = SimBackend::new();
        let timeouts = PipelineTimeouts::uniform(Duration::from_millis(5));
        let mut chain = Chain::default();
        let encoder = chain.create(&backend, ComponentRole::ImageEncode).unwrap();
        enable_ports(&encoder, &timeouts).unwrap();
        drop(encoder);
        backend.update_faults(|f| f.stall_port_commands = true);
        chain.teardown(&timeouts);
        assert_eq!(backend.live_components(), 0);
    }

    #[test]
    fn creation_failure_is_a_resource_error() {
        let backend = SimBackend::with_faults(SimFaults {
            unavailable: Some(ComponentRole::ImageEncode),
            ..SimFaults::default()
        });
        let mut chain = Chain::default();
        let err = chain
            .create(&backend, ComponentRole::ImageEncode)
            .unwrap_err();
        assert_eq!(err.code(), "resource_unavailable");
        assert!(chain.is_empty());
    }
}
