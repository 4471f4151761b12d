//! In-memory swarm simulation.
//!
//! Spins up agents on a private [`MemoryNetwork`], has the first one fill a
//! shared task list, lets the others claim and complete tasks, and reports
//! the converged list and per-agent gossip counters.

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use futures::future::join_all;
use serde::Serialize;
use std::time::Duration;
use swarmlink_core::config::Config;
use swarmlink_core::crdt::{TaskItem, TaskList, TaskStatus};
use swarmlink_core::gossip::MemoryNetwork;
use swarmlink_core::Agent;
use tabled::Tabled;
use tracing::debug;

use crate::output::{self, OutputFormat};

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum Topology {
    /// Every agent bootstraps from the first
    #[default]
    Star,
    /// Each agent bootstraps from the one before it
    Chain,
}

#[derive(Args)]
pub struct SimulateArgs {
    /// Number of agents
    #[arg(short, long, default_value = "3")]
    agents: usize,

    /// Number of tasks the first agent creates
    #[arg(short, long, default_value = "5")]
    tasks: usize,

    /// Task list name
    #[arg(short, long, default_value = "simulation")]
    list: String,

    #[arg(long, value_enum, default_value = "star")]
    topology: Topology,

    /// Every agent tries to claim every task at once
    #[arg(long)]
    contend: bool,

    /// Claim winners complete their tasks
    #[arg(long)]
    complete: bool,

    /// Seconds to wait for replicas to converge
    #[arg(long, default_value = "10")]
    timeout: u64,
}

#[derive(Debug, Serialize, Tabled)]
struct TaskRow {
    #[tabled(rename = "Order")]
    order: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Assignee")]
    assignee: String,
}

#[derive(Debug, Serialize, Tabled)]
struct AgentRow {
    #[tabled(rename = "Agent")]
    agent: String,
    #[tabled(rename = "Neighbors")]
    neighbors: usize,
    #[tabled(rename = "Claimed")]
    claimed: usize,
    #[tabled(rename = "Published")]
    published: u64,
    #[tabled(rename = "Delivered")]
    delivered: u64,
    #[tabled(rename = "Relayed")]
    relayed: u64,
    #[tabled(rename = "Duplicates")]
    duplicates: u64,
}

#[derive(Serialize)]
struct Report {
    tasks: Vec<TaskRow>,
    agents: Vec<AgentRow>,
    converged_in_ms: u128,
}

fn task_row(task: &TaskItem) -> TaskRow {
    TaskRow {
        order: task.order_key.to_string(),
        title: task.title.clone(),
        status: task.status.to_string(),
        assignee: task
            .assignee
            .map(|id| id.short())
            .unwrap_or_else(|| "-".to_string()),
    }
}

/// Poll every replica until `done` holds for all of them.
async fn converge<F>(lists: &[TaskList], deadline: tokio::time::Instant, what: &str, done: F) -> Result<()>
where
    F: Fn(&[TaskItem]) -> bool,
{
    loop {
        let mut snapshots = Vec::with_capacity(lists.len());
        for list in lists {
            snapshots.push(list.list_tasks().await);
        }
        let agree = snapshots.windows(2).all(|pair| pair[0] == pair[1]);
        if agree && snapshots.iter().all(|tasks| done(tasks)) {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("Replicas did not converge ({})", what);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn spawn_swarm(args: &SimulateArgs) -> Result<Vec<Agent>> {
    let network = MemoryNetwork::new();
    let mut config = Config::default();
    config.network.bootstrap_retry_delay = Duration::from_millis(20);
    config.tasks.anti_entropy_interval = Duration::from_secs(1);

    let mut agents: Vec<Agent> = Vec::with_capacity(args.agents);
    for i in 0..args.agents {
        let bootstrap = match (args.topology, agents.first(), agents.last()) {
            (_, None, _) => Vec::new(),
            (Topology::Star, Some(first), _) => vec![first.address()],
            (Topology::Chain, _, Some(last)) => vec![last.address()],
            (Topology::Chain, _, None) => Vec::new(),
        };
        let agent = Agent::builder()
            .with_network(network.clone())
            .with_config(config.clone())
            .with_bootstrap_peers(bootstrap)
            .build()
            .await
            .with_context(|| format!("Failed to build agent {}", i))?;
        agent
            .join_network()
            .await
            .with_context(|| format!("Agent {} failed to join", i))?;
        debug!(agent = i, agent_id = %agent.agent_id().short(), "Agent joined");
        agents.push(agent);
    }
    Ok(agents)
}

pub async fn execute(args: SimulateArgs, format: OutputFormat) -> Result<()> {
    if args.agents == 0 {
        bail!("--agents must be at least 1");
    }
    let started = tokio::time::Instant::now();
    let deadline = started + Duration::from_secs(args.timeout);

    let agents = spawn_swarm(&args).await?;
    let mut lists = Vec::with_capacity(agents.len());
    for agent in &agents {
        lists.push(agent.join_task_list(&args.list).await?);
    }

    for i in 0..args.tasks {
        lists[0]
            .add_task(format!("task-{}", i + 1), "created by agent 0")
            .await?;
    }
    converge(&lists, deadline, "creation", |tasks| tasks.len() == args.tasks).await?;

    let ids: Vec<_> = lists[0].list_tasks().await.into_iter().map(|t| t.id).collect();
    let mut refused = 0usize;
    if args.contend {
        for id in &ids {
            let attempts = lists.iter().map(|list| list.claim_task(*id));
            refused += join_all(attempts).await.into_iter().filter(Result::is_err).count();
        }
    } else {
        for (i, id) in ids.iter().enumerate() {
            if lists[i % lists.len()].claim_task(*id).await.is_err() {
                refused += 1;
            }
        }
    }
    converge(&lists, deadline, "claims", |tasks| {
        tasks.iter().all(|t| t.status != TaskStatus::Empty)
    })
    .await?;

    if args.complete {
        for (agent, list) in agents.iter().zip(&lists) {
            for task in list.list_tasks().await {
                if task.assignee == Some(agent.agent_id()) && task.status == TaskStatus::Claimed {
                    list.complete_task(task.id).await?;
                }
            }
        }
        converge(&lists, deadline, "completion", |tasks| {
            tasks.iter().all(|t| t.status == TaskStatus::Done)
        })
        .await?;
    }
    let elapsed = started.elapsed();

    let final_tasks = lists[0].list_tasks().await;
    let report = Report {
        tasks: final_tasks.iter().map(task_row).collect(),
        agents: agents
            .iter()
            .map(|agent| {
                let stats = agent.gossip_stats();
                AgentRow {
                    agent: agent.agent_id().short(),
                    neighbors: agent.neighbors().len(),
                    claimed: final_tasks
                        .iter()
                        .filter(|t| t.assignee == Some(agent.agent_id()))
                        .count(),
                    published: stats.published,
                    delivered: stats.delivered,
                    relayed: stats.relayed,
                    duplicates: stats.duplicates,
                }
            })
            .collect(),
        converged_in_ms: elapsed.as_millis(),
    };

    for agent in &agents {
        agent.leave_network().await?;
    }

    match format {
        OutputFormat::Table => {
            output::print_header("Tasks");
            output::print_list(&report.tasks, format)?;
            output::print_header("Agents");
            output::print_list(&report.agents, format)?;
            println!();
            if refused > 0 {
                output::print_info(&format!("{} claim attempts lost or were refused", refused));
            }
            output::print_success(&format!(
                "{} agents converged on {} tasks in {} ms",
                agents.len(),
                report.tasks.len(),
                report.converged_in_ms
            ));
        }
        _ => output::print_item(&report, format)?,
    }
    Ok(())
}
