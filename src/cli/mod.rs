#![allow(clippy::doc_markdown)]

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "bdg",
    version,
    about = "Browser telemetry collector over the Chrome DevTools Protocol",
    long_about = "bdg records what a page actually does. `bdg start <url>` launches (or \
        attaches to) Chrome, opens the page, and leaves a background daemon collecting \
        network requests, console messages, and DOM state over the Chrome DevTools \
        Protocol. Short-lived commands (`peek`, `tail`, `status`, `details`, `dom`, \
        `cdp`) query the daemon over a local socket while the session runs; `bdg stop` \
        captures a final DOM snapshot and writes the full session to session.json.\n\n\
        Designed for AI agents and shell scripting: every command prints structured \
        JSON on stdout and structured JSON errors on stderr, with a stable exit-code \
        mapping.",
    term_width = 100
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args)]
pub struct GlobalOpts {
    /// Session directory (default: ~/.bdg)
    #[arg(long, env = "BDG_SESSION_DIR", global = true)]
    pub session_dir: Option<PathBuf>,

    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub output: OutputFormat,
}

#[allow(clippy::struct_excessive_bools)]
#[derive(Args)]
#[group(multiple = false)]
pub struct OutputFormat {
    /// Output as compact JSON
    #[arg(short = 'j', long, global = true)]
    pub json: bool,

    /// Output as pretty-printed JSON
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Output as human-readable plain text
    #[arg(long, global = true)]
    pub plain: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start a telemetry session for a URL
    #[command(
        long_about = "Launch Chrome (or attach via --ws-url), open the URL, and start the \
            background daemon that collects telemetry until `bdg stop`. Prints the session \
            metadata once collectors are running."
    )]
    Start(StartArgs),

    /// Stop the session and write session.json
    Stop(StopArgs),

    /// Show session status
    #[command(
        long_about = "Query the daemon for session status. Falls back to the on-disk session \
            metadata when the daemon is unreachable."
    )]
    Status,

    /// Preview recently captured telemetry
    Peek(PeekArgs),

    /// Follow new telemetry as it is captured
    Tail(TailArgs),

    /// Show one captured item in full
    Details(DetailsArgs),

    /// Send a raw CDP command to the session tab
    #[command(
        long_about = "Forward a Chrome DevTools Protocol command to the session tab and print \
            the result. Method names are matched case-insensitively against the bundled \
            protocol schema; use --list to enumerate methods."
    )]
    Cdp(CdpArgs),

    /// DOM inspection helpers
    Dom(DomArgs),

    /// Remove files left behind by a crashed session
    Cleanup,

    /// Configuration file management
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),

    /// Render man pages
    Man(ManArgs),
}

#[allow(clippy::struct_excessive_bools)]
#[derive(Args)]
pub struct StartArgs {
    /// URL to open (https:// is assumed when no scheme is given)
    pub url: String,

    /// Reuse an existing tab showing this URL instead of opening a new one
    #[arg(long)]
    pub reuse_tab: bool,

    /// Launch Chrome headless
    #[arg(long)]
    pub headless: bool,

    /// Chrome remote-debugging port (default: an OS-assigned free port)
    #[arg(long)]
    pub port: Option<u16>,

    /// Attach to a running Chrome via its browser WebSocket URL
    #[arg(long)]
    pub ws_url: Option<String>,

    /// Kill Chrome when the session stops
    #[arg(long)]
    pub kill_chrome: bool,

    /// Stop the session automatically after this many milliseconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Telemetry kinds to collect (default: all)
    #[arg(long, value_enum, value_delimiter = ',')]
    pub collect: Vec<CollectKind>,

    /// Capture requests to tracking/analytics domains too
    #[arg(long)]
    pub include_all: bool,

    /// Wildcard URL pattern to always capture (repeatable; acts as a whitelist)
    #[arg(long = "include", value_name = "PATTERN")]
    pub include_patterns: Vec<String>,

    /// Wildcard URL pattern to drop (repeatable)
    #[arg(long = "exclude", value_name = "PATTERN")]
    pub exclude_patterns: Vec<String>,

    /// Fetch every eligible response body
    #[arg(long)]
    pub fetch_all_bodies: bool,

    /// Response-body size cap in bytes (default: 5242880)
    #[arg(long)]
    pub max_body_size: Option<u64>,

    /// Console message pattern to keep (repeatable; acts as a whitelist)
    #[arg(long = "console-include", value_name = "PATTERN")]
    pub console_include: Vec<String>,

    /// Console message pattern to drop (repeatable)
    #[arg(long = "console-exclude", value_name = "PATTERN")]
    pub console_exclude: Vec<String>,

    /// Extra Chrome command-line argument (repeatable)
    #[arg(long = "chrome-arg", value_name = "ARG")]
    pub chrome_args: Vec<String>,

    /// Budget for Chrome startup in milliseconds (default: 30000)
    #[arg(long)]
    pub launch_timeout: Option<u64>,

    /// Run the daemon in the foreground instead of detaching
    #[arg(long, hide = true)]
    pub foreground: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CollectKind {
    Network,
    Console,
    Dom,
}

#[derive(Args)]
pub struct StopArgs {
    /// Kill Chrome instead of leaving it running
    #[arg(long)]
    pub kill_chrome: bool,
}

#[derive(Args)]
pub struct PeekArgs {
    /// How many items of each kind to show (max 100)
    #[arg(long, default_value_t = 10)]
    pub last: usize,

    /// Skip this many items from the end
    #[arg(long, default_value_t = 0)]
    pub offset: usize,
}

#[derive(Args)]
pub struct TailArgs {
    /// Poll interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub interval: u64,

    /// Stop following after this many milliseconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Args)]
pub struct DetailsArgs {
    /// Which collection the id refers to
    #[arg(value_enum)]
    pub item_type: ItemTypeArg,

    /// Network requestId, or console message index
    pub id: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ItemTypeArg {
    Network,
    Console,
}

#[derive(Args)]
pub struct CdpArgs {
    /// CDP method (e.g. Page.navigate); any casing accepted
    pub method: Option<String>,

    /// Parameters as a JSON object
    pub params: Option<String>,

    /// List known methods (optionally filtered by the method prefix)
    #[arg(long)]
    pub list: bool,
}

#[derive(Args)]
pub struct DomArgs {
    #[command(subcommand)]
    pub command: DomCommand,
}

#[derive(Subcommand)]
pub enum DomCommand {
    /// Find elements by CSS selector; results are cached for index refs
    Query(DomQueryArgs),
    /// Print an element's outer HTML
    Get(DomGetArgs),
    /// Highlight an element in the browser
    Highlight(DomGetArgs),
    /// Capture a screenshot of the page
    Screenshot(DomScreenshotArgs),
}

#[derive(Args)]
pub struct DomQueryArgs {
    /// CSS selector
    pub selector: String,

    /// Maximum matches to describe
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Args)]
pub struct DomGetArgs {
    /// CSS selector, or an index into the last `dom query` result
    pub target: String,
}

#[derive(Args)]
pub struct DomScreenshotArgs {
    /// Image format: png, jpeg, webp
    #[arg(long, default_value = "png")]
    pub format: String,

    /// Compression quality for jpeg/webp
    #[arg(long)]
    pub quality: Option<u8>,

    /// Capture the full scrollable page, not just the viewport
    #[arg(long)]
    pub full_page: bool,

    /// Write the decoded image to this file instead of printing base64
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the resolved configuration
    Show,
    /// Create a commented template config file
    Init(ConfigInitArgs),
    /// Print the path of the active config file
    Path,
}

#[derive(Args)]
pub struct ConfigInitArgs {
    /// Where to create the file (default: platform config dir)
    pub path: Option<PathBuf>,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}

#[derive(Args)]
pub struct ManArgs {
    /// Subcommand to render (default: the top-level page)
    pub command: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn start_parses_filters_and_collect() {
        let cli = Cli::try_parse_from([
            "bdg",
            "start",
            "example.com",
            "--include",
            "api.example.com",
            "--exclude",
            "*cdn*",
            "--collect",
            "network,console",
            "--headless",
        ])
        .unwrap();
        let Command::Start(args) = cli.command else {
            panic!("expected start");
        };
        assert_eq!(args.url, "example.com");
        assert_eq!(args.include_patterns, vec!["api.example.com"]);
        assert_eq!(args.exclude_patterns, vec!["*cdn*"]);
        assert_eq!(
            args.collect,
            vec![CollectKind::Network, CollectKind::Console]
        );
        assert!(args.headless);
        assert!(!args.foreground);
    }

    #[test]
    fn peek_defaults() {
        let cli = Cli::try_parse_from(["bdg", "peek"]).unwrap();
        let Command::Peek(args) = cli.command else {
            panic!("expected peek");
        };
        assert_eq!(args.last, 10);
        assert_eq!(args.offset, 0);
    }

    #[test]
    fn output_flags_are_mutually_exclusive() {
        let result = Cli::try_parse_from(["bdg", "status", "--json", "--plain"]);
        assert!(result.is_err());
    }

    #[test]
    fn dom_screenshot_flags() {
        let cli = Cli::try_parse_from([
            "bdg",
            "dom",
            "screenshot",
            "--format",
            "jpeg",
            "--quality",
            "80",
            "--full-page",
            "-o",
            "/tmp/shot.jpg",
        ])
        .unwrap();
        let Command::Dom(DomArgs {
            command: DomCommand::Screenshot(args),
        }) = cli.command
        else {
            panic!("expected dom screenshot");
        };
        assert_eq!(args.format, "jpeg");
        assert_eq!(args.quality, Some(80));
        assert!(args.full_page);
    }
}
