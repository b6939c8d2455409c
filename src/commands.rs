//! CLI command definitions
//!
//! Defines the clap commands for the capability test runner.

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Run the tests matching the given filters
    TestsRun {
        /// Test ids to run (all when omitted)
        ids: Vec<String>,

        /// Only run tests declared for this compositor tag
        #[arg(long)]
        compositor: Option<String>,

        /// Skip tests known to fail on the selected compositor
        #[arg(long, requires = "compositor")]
        compositor_skip_failing: bool,

        /// Per-test timeout in seconds (0 disables it)
        #[arg(long)]
        timeout: Option<u64>,

        /// Print the report as JSON instead of the summary
        #[arg(long)]
        json: bool,
    },

    /// List the declared tests
    TestsList,

    /// List the globals the compositor advertises
    WaylandList,

    /// Open a window for a few seconds and print the events it receives
    ShowWindow {
        /// How long to keep the window open
        #[arg(long, default_value_t = 2)]
        seconds: u64,
    },

    /// Browse the session bus one level at a time
    ///
    /// With no arguments prints the service names; each extra segment
    /// (service, object path, interface) prints the next level down, e.g.
    /// `dbus-list org.freedesktop.systemd1 /org/freedesktop/LogControl1`.
    DbusList {
        /// Service name, object path and interface
        #[arg(num_args = 0..=3)]
        segments: Vec<String>,
    },

    /// Send one command to the VM monitor and print the reply
    MonitorSend {
        /// Command line, e.g. `sendkey ctrl-alt-f2`
        #[arg(required = true, num_args = 1..)]
        command: Vec<String>,
    },
}
