// packages/engine/benches/turn_bench.rs
//! Turn throughput: every agent pings a random peer each turn

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use troupe_engine::{
    Agent, AgentContext, BehaviorResult, Environment, ExecutionMode, Message, Payload,
    SchedulerConfig,
};

struct Chatter {
    peers: usize,
}

impl Agent for Chatter {
    fn act(&mut self, _ctx: &AgentContext<'_>, message: Message) -> BehaviorResult {
        black_box(message.payload().len());
        Ok(())
    }

    fn idle_act(&mut self, ctx: &AgentContext<'_>) -> BehaviorResult {
        let target = format!("c{}", (ctx.turn() as usize) % self.peers);
        ctx.send_by_name(&target, Payload::raw(&b"ping"[..]), true);
        Ok(())
    }
}

fn populated(mode: ExecutionMode, agents: usize) -> Environment {
    let config = SchedulerConfig::default().with_mode(mode).with_seed(1);
    let env = Environment::new(config).unwrap();
    for i in 0..agents {
        env.add(format!("c{}", i), Chatter { peers: agents });
    }
    env
}

fn bench_turns(c: &mut Criterion) {
    let mut group = c.benchmark_group("turn");

    for agents in [100usize, 1_000] {
        for mode in [ExecutionMode::Sequential, ExecutionMode::Parallel] {
            let mut env = populated(mode, agents);
            env.run_turn().unwrap();

            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", mode), agents),
                &agents,
                |b, _| b.iter(|| env.run_turn().unwrap()),
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_turns);
criterion_main!(benches);
