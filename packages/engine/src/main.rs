// packages/engine/src/main.rs
//! Troupe demo runner
//!
//! Runs one of the bundled scenarios on a freshly configured environment:
//!
//! - `ping-pong`: two agents bounce a counter until it reaches a limit
//! - `sum-tree`: a root agent spawns a tree of agents that sum their ids back up

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use troupe_engine::observability::init_tracing;
use troupe_engine::{
    Agent, AgentContext, AgentId, BehaviorResult, EngineConfig, Environment, ExecutionMode,
    Message,
};

#[derive(Parser)]
#[command(name = "troupe")]
#[command(about = "Turn-based multi-agent runtime demos")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./troupe.toml when present)
    #[arg(long, short, env = "TROUPE_CONFIG")]
    config: Option<PathBuf>,

    /// Execution mode override
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// RNG seed override
    #[arg(long)]
    seed: Option<u64>,

    /// Worker thread override for parallel mode
    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    #[value(name = "sequential")]
    Sequential,
    #[value(name = "sequential_random")]
    SequentialRandom,
    #[value(name = "parallel")]
    Parallel,
}

impl From<ModeArg> for ExecutionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Sequential => ExecutionMode::Sequential,
            ModeArg::SequentialRandom => ExecutionMode::SequentialRandom,
            ModeArg::Parallel => ExecutionMode::Parallel,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Two agents exchanging a counter
    PingPong {
        /// Exchanges before both agents stop
        #[arg(short, long, default_value = "1000")]
        rounds: u64,
    },

    /// Spawn a tree of agents and sum their ids back to the root
    SumTree {
        /// Total number of agents in the tree
        #[arg(short, long, default_value = "10000")]
        agents: u64,
        /// Children per agent
        #[arg(short, long, default_value = "10")]
        fanout: u64,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct Ball {
    count: u64,
}

struct Player {
    rounds: u64,
    serve: bool,
    last: Arc<AtomicU64>,
}

impl Agent for Player {
    fn setup(&mut self, ctx: &AgentContext<'_>) -> BehaviorResult {
        if self.serve {
            let Some(opponent) = ctx.first_agent_by_name("pong") else {
                bail!("no opponent named 'pong'");
            };
            ctx.send_json(opponent, &Ball { count: 0 })?;
        }
        Ok(())
    }

    fn act(&mut self, ctx: &AgentContext<'_>, message: Message) -> BehaviorResult {
        let ball: Ball = message.decode_json()?;
        self.last.store(ball.count, Ordering::Relaxed);

        if ball.count >= self.rounds {
            ctx.remove(message.sender());
            ctx.stop();
            return Ok(());
        }
        ctx.send_json(message.sender(), &Ball { count: ball.count + 1 })?;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Partial {
    sum: u64,
}

struct TreeNode {
    number: u64,
    parent: Option<AgentId>,
    total: u64,
    fanout: u64,
    sum: u64,
    pending: u64,
    result: Arc<AtomicU64>,
}

impl TreeNode {
    fn root(total: u64, fanout: u64, result: Arc<AtomicU64>) -> Self {
        Self::child(0, None, total, fanout, result)
    }

    fn child(number: u64, parent: Option<AgentId>, total: u64, fanout: u64, result: Arc<AtomicU64>) -> Self {
        Self {
            number,
            parent,
            total,
            fanout,
            sum: number,
            pending: 0,
            result,
        }
    }

    fn report(&self, ctx: &AgentContext<'_>) -> BehaviorResult {
        match self.parent {
            Some(parent) => {
                ctx.send_json(parent, &Partial { sum: self.sum })?;
            }
            None => self.result.store(self.sum, Ordering::SeqCst),
        }
        ctx.stop();
        Ok(())
    }
}

impl Agent for TreeNode {
    fn setup(&mut self, ctx: &AgentContext<'_>) -> BehaviorResult {
        for i in 1..=self.fanout {
            let number = self.number * self.fanout + i;
            if number >= self.total {
                break;
            }
            let child = TreeNode::child(
                number,
                Some(ctx.id()),
                self.total,
                self.fanout,
                Arc::clone(&self.result),
            );
            ctx.spawn(format!("a{}", number), child);
            self.pending += 1;
        }

        if self.pending == 0 {
            self.report(ctx)?;
        }
        Ok(())
    }

    fn act(&mut self, ctx: &AgentContext<'_>, message: Message) -> BehaviorResult {
        let partial: Partial = message.decode_json()?;
        self.sum += partial.sum;
        self.pending = self.pending.saturating_sub(1);

        if self.pending == 0 {
            self.report(ctx)?;
        }
        Ok(())
    }
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::load()?,
    };

    if let Some(mode) = cli.mode {
        config.scheduler.mode = mode.into();
    }
    if let Some(seed) = cli.seed {
        config.scheduler.seed = Some(seed);
    }
    if let Some(workers) = cli.workers {
        config.scheduler.workers = Some(workers);
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(&config.logging)?;

    info!("Starting troupe v{}", troupe_engine::VERSION);
    let mut env = Environment::new(config.scheduler.clone())?;
    let started = Instant::now();

    match cli.command {
        Commands::PingPong { rounds } => {
            let last = Arc::new(AtomicU64::new(0));
            env.add("ping", Player { rounds, serve: true, last: Arc::clone(&last) });
            env.add("pong", Player { rounds, serve: false, last: Arc::clone(&last) });

            let summary = env.start()?;
            info!(
                "Ping-pong reached {} after {} turns in {:?}",
                last.load(Ordering::Relaxed),
                summary.turns,
                started.elapsed()
            );
        }
        Commands::SumTree { agents, fanout } => {
            if agents == 0 || fanout == 0 {
                bail!("sum-tree needs at least one agent and a fanout of at least one");
            }
            let result = Arc::new(AtomicU64::new(0));
            env.add("a0", TreeNode::root(agents, fanout, Arc::clone(&result)));

            let summary = env.start()?;
            let expected = agents * (agents - 1) / 2;
            info!(
                "Sum-tree of {} agents summed to {} (expected {}) in {} turns, {:?}",
                agents,
                result.load(Ordering::SeqCst),
                expected,
                summary.turns,
                started.elapsed()
            );
        }
    }
    Ok(())
}
