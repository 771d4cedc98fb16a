// Command subsystem
//
// Assembles the registry from built-ins and active plugin commands, wires the
// dispatcher to `command.execute` events, and rebuilds the registry on
// `plugin.reload`.

use crate::command::builtin::BuiltinCommands;
use crate::command::dispatcher::CommandDispatcher;
use crate::command::registry::{Command, CommandRegistry};
use crate::command::relay::{plugin_relay, relay_static_data};
use crate::events::{EventBus, EventType};
use crate::lifecycle::Subsystem;
use crate::plugins::PluginManager;
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Built-in commands first, then one relay command per active plugin command
pub fn assemble_commands(
    builtins: &BuiltinCommands,
    plugins: &PluginManager,
    bus: &Arc<EventBus>,
) -> anyhow::Result<Vec<Command>> {
    let mut commands = builtins.commands()?;

    for plugin_command in plugins.plugin_commands() {
        let spec = plugin_command.spec;
        let static_data = relay_static_data(spec.event, spec.data.clone());
        match Command::handler(
            &spec.cmd,
            &spec.desc,
            plugin_relay(bus.clone()),
            Some(static_data),
        ) {
            Ok(command) => {
                let category = spec
                    .category
                    .clone()
                    .unwrap_or_else(|| plugin_command.plugin_id.clone());
                commands.push(command.with_category(category));
            }
            Err(e) => warn!(
                plugin = %plugin_command.plugin_id,
                command = %spec.cmd,
                error = %e,
                "Skipping invalid plugin command"
            ),
        }
    }
    Ok(commands)
}

struct Assembly {
    registry: Arc<CommandRegistry>,
    builtins: Arc<BuiltinCommands>,
    plugins: Arc<PluginManager>,
    bus: Arc<EventBus>,
}

impl Assembly {
    fn rebuild(&self) -> anyhow::Result<usize> {
        let commands = assemble_commands(&self.builtins, &self.plugins, &self.bus)?;
        Ok(self.registry.rebuild(commands))
    }
}

pub struct CommandSubsystem {
    assembly: Arc<Assembly>,
    dispatcher: Arc<CommandDispatcher>,
    broadcast_menu: bool,
    subscribed: AtomicBool,
}

impl CommandSubsystem {
    /// `broadcast_menu` publishes the command menu once on start, for channel frontends
    pub fn new(
        dispatcher: Arc<CommandDispatcher>,
        builtins: Arc<BuiltinCommands>,
        plugins: Arc<PluginManager>,
        bus: Arc<EventBus>,
        broadcast_menu: bool,
    ) -> Self {
        let registry = dispatcher.registry().clone();
        Self {
            assembly: Arc::new(Assembly {
                registry,
                builtins,
                plugins,
                bus,
            }),
            dispatcher,
            broadcast_menu,
            subscribed: AtomicBool::new(false),
        }
    }

    fn subscribe(&self) {
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return;
        }
        let bus = &self.assembly.bus;

        let dispatcher = self.dispatcher.clone();
        bus.subscribe(EventType::CommandExecute, move |event| {
            let dispatcher = dispatcher.clone();
            async move { dispatcher.handle_bus_event(event).await }
        });

        let assembly = self.assembly.clone();
        bus.subscribe(EventType::PluginReload, move |_| {
            let assembly = assembly.clone();
            async move {
                if let Err(e) = assembly.plugins.sync().await {
                    error!(error = %e, "Plugin re-sync failed, keeping current commands");
                    return;
                }
                match assembly.rebuild() {
                    Ok(count) => info!(commands = count, "Commands reloaded after plugin change"),
                    Err(e) => error!(error = %e, "Failed to rebuild command registry"),
                }
            }
        });
    }
}

#[async_trait]
impl Subsystem for CommandSubsystem {
    async fn start(&self) -> anyhow::Result<()> {
        let count = self.assembly.rebuild()?;
        self.subscribe();
        info!(commands = count, "Command subsystem started");

        if self.broadcast_menu {
            let menu = self.assembly.registry.menu();
            self.assembly
                .bus
                .publish(EventType::CommandRegister, json!({ "commands": menu }));
        }
        Ok(())
    }
}
