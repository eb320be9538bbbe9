use std::sync::Arc;
use std::time::Duration;

use tasklane::{
    Config, Context, LogWriter, MessageCtx, Messaging, Runtime, Subscribe, Task, Terminal,
    TerminalCx, TerminalState, TimeLimit,
};

#[derive(Default)]
struct Ping {
    rounds: u64,
}

impl Task for Ping {}

#[derive(Default)]
struct Pong {
    served: u64,
}

impl Task for Pong {
    fn on_stop_requested(&mut self, cx: &mut Context<Self>) {
        tracing::info!(task = cx.name(), served = self.served, "pong stopping");
    }
}

enum Desk {
    Serving,
    Closed,
}

impl TerminalState<Pong> for Desk {
    fn name(&self) -> &'static str {
        match self {
            Desk::Serving => "Serving",
            Desk::Closed => "Closed",
        }
    }

    fn on_entry(&mut self, term: &mut TerminalCx<'_, Pong, Self>) {
        let served = term.task().served;
        tracing::info!(state = self.name(), served, "desk");
    }

    fn on_stop_requested(&mut self, term: &mut TerminalCx<'_, Pong, Self>) {
        term.next_state(Desk::Closed);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = Config {
        worker_threads: 2,
        ..Config::default()
    };
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter)];
    let rt = Runtime::builder(cfg).with_subscribers(subs).build()?;

    let ping = rt.spawn("ping", Ping::default())?;
    let pong = rt.spawn("pong", Pong::default())?;

    let desk = pong
        .call_later(|_, cx| cx.register_terminal(Terminal::<Pong, Desk>::new().with_label("desk")))
        .join()?;
    desk.next_state(Desk::Serving).join()?;

    let bus: Messaging<u64, u64> = Messaging::new();
    bus.register("game/+/ping", &pong, |p: &mut Pong, _: &mut Context<Pong>, m: &MessageCtx<u64>, n: &u64| {
        p.served += 1;
        if let Err(e) = m.reply(n + 1) {
            tracing::warn!(error = %e, "reply failed");
        }
    })?;

    for n in 0..5u64 {
        let topic = format!("game/{n}/ping");
        let sent = bus.publish_request(
            &topic,
            n,
            TimeLimit::within(Duration::from_millis(500)),
            &ping,
            |p: &mut Ping, cx: &mut Context<Ping>, m: &MessageCtx<u64>, answer: u64| {
                p.rounds += 1;
                tracing::info!(task = cx.name(), topic = m.topic(), answer, "pong answered");
            },
        )?;
        sent.join()?;
    }

    let rounds = ping.call_later(|p, _| p.rounds).join()?;
    println!("{rounds} rounds played");

    rt.shutdown(Duration::from_secs(2))?;
    Ok(())
}
