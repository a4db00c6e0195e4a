//! Role wrappers around the node context. A role fixes the channel-count
//! limits, installs its break behavior, and shares the teardown routine
//! that keeps the fleet self-consistent on every exit path.

use crate::context::{self, NodeContext};
use crate::net::{ErrorType, NetworkError, NetworkResult};
use crate::registry::RegistryProxy;
use skein::logging::{self, Logger};
use std::ops::{Deref, DerefMut};

/// A node that only produces: no inputs, at least one output.
pub struct SourceContext {
    context: NodeContext,
}

/// A node that only consumes: at least one input, no outputs.
pub struct SinkContext {
    context: NodeContext,
}

/// A node that consumes and produces.
pub struct FilterContext {
    context: NodeContext,
}

fn wire_break_hook(context: &mut NodeContext) {
    let queue = context.queue();

    // Wake any loop parked on the pending queue so the stop is seen at
    // once; blocking sends observe the cleared run flag on their next
    // slice.
    context.set_break_hook(move || queue.wake());
}

impl SourceContext {
    pub fn new(name: &str, max_outputs: usize, logging_enabled: bool, log: &Logger) -> NetworkResult<SourceContext> {
        if max_outputs == 0 {
            return Err(NetworkError::Fatal(ErrorType::LimitExceeded));
        }

        let mut context = NodeContext::new(name, 0, max_outputs, logging_enabled, log)?;

        wire_break_hook(&mut context);

        Ok(SourceContext { context })
    }
}

impl SinkContext {
    pub fn new(name: &str, max_inputs: usize, logging_enabled: bool, log: &Logger) -> NetworkResult<SinkContext> {
        if max_inputs == 0 {
            return Err(NetworkError::Fatal(ErrorType::LimitExceeded));
        }

        let mut context = NodeContext::new(name, max_inputs, 0, logging_enabled, log)?;

        wire_break_hook(&mut context);

        Ok(SinkContext { context })
    }
}

impl FilterContext {
    pub fn new(
        name: &str,
        max_inputs: usize,
        max_outputs: usize,
        logging_enabled: bool,
        log: &Logger,
    ) -> NetworkResult<FilterContext> {
        if max_inputs == 0 || max_outputs == 0 {
            return Err(NetworkError::Fatal(ErrorType::LimitExceeded));
        }

        let mut context = NodeContext::new(name, max_inputs, max_outputs, logging_enabled, log)?;

        wire_break_hook(&mut context);

        Ok(FilterContext { context })
    }
}

macro_rules! deref_to_context {
    ($role:ident) => {
        impl Deref for $role {
            type Target = NodeContext;

            fn deref(&self) -> &NodeContext {
                &self.context
            }
        }

        impl DerefMut for $role {
            fn deref_mut(&mut self) -> &mut NodeContext {
                &mut self.context
            }
        }
    };
}

deref_to_context!(SourceContext);
deref_to_context!(SinkContext);
deref_to_context!(FilterContext);

/// The node name a process registers under: the override when given,
/// otherwise the role's default, with the tag appended.
pub fn construct_node_name(override_name: Option<&str>, default_base: &str, tag: Option<&str>) -> String {
    let base = override_name.filter(|name| !name.is_empty()).unwrap_or(default_base);

    match tag.filter(|tag| !tag.is_empty()) {
        Some(tag) => format!("{}-{}", base, tag),
        None => base.to_string(),
    }
}

/// The shared teardown path. Ordering is strict: close peer connections
/// (outputs then inputs), deregister every output channel, every input
/// channel, then the node. The run flag is re-armed before each registry
/// call so a pending stop does not starve the deregistrations, and a
/// failed step records exit code 1 without skipping the rest.
pub fn deregister_node(
    proxy: &mut RegistryProxy,
    context: &mut NodeContext,
    registered_outputs: &[String],
    registered_inputs: &[String],
) -> i32 {
    let node_name = context.name().to_string();
    let mut exit_code = 0;

    context.close_peer_connections();

    for path in registered_outputs.iter().chain(registered_inputs.iter()) {
        context::set_keep_running(true);

        let (status, removed) = proxy.remove_channel(&node_name, path);

        if !status.success {
            logging::error!(context.log(), "remove_channel failed";
                            "path" => path.to_string(), "detail" => status.detail);
            exit_code = 1;
        } else if !removed {
            context.report(&format!("{} already unregistered.", path));
            exit_code = 1;
        }
    }

    context::set_keep_running(true);

    let (status, removed) = proxy.remove_node(&node_name);

    if !status.success {
        logging::error!(context.log(), "remove_node failed"; "detail" => status.detail);
        exit_code = 1;
    } else if !removed {
        context.report(&format!("{} already unregistered.", node_name));
        exit_code = 1;
    }

    exit_code
}
