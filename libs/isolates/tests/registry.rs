//! Channel directory: eventual lookups and name uniqueness through the system

mod common;

use parking_lot::Mutex;
use std::sync::{Arc, Barrier};
use std::thread;

use common::{eventually, Collector, TIMEOUT};
use isolates::{
    prototype, Bundle, Channel, Context, IsoError, IsoSystem, Isolate, Result, TokioScheduler,
};
use tokio::sync::mpsc;

#[test]
fn test_eventual_lookup_resolves_across_threads() {
    let system = IsoSystem::new().unwrap();
    let lookup = system.channels().get("late#events");
    assert!(!lookup.is_resolved());

    let waiter = {
        let lookup = lookup.clone();
        thread::spawn(move || {
            let channel: Channel<u32> = lookup.wait().unwrap().downcast().unwrap();
            channel.send(42).unwrap();
            channel.name().to_string()
        })
    };

    let seen = Arc::new(Mutex::new(Vec::<u32>::new()));
    system
        .create_isolate(prototype::instance(Collector { seen: seen.clone() }).named("late"), None)
        .unwrap();

    assert_eq!(waiter.join().unwrap(), "late#events");
    assert!(eventually(|| *seen.lock() == vec![42]));

    // Every clone observes the same channel
    let first = lookup.try_get().unwrap().unwrap().downcast::<u32>().unwrap();
    let again = system.channels().get("late#events").wait().unwrap().downcast::<u32>().unwrap();
    assert!(first.same_channel(&again));
    assert_eq!(system.channels().waiting(), 0);
    assert!(system.shutdown(TIMEOUT));
}

#[test]
fn test_typed_lookup_rejects_wrong_event_type() {
    let system = IsoSystem::new().unwrap();
    let seen = Arc::new(Mutex::new(Vec::<u32>::new()));
    system
        .create_isolate(prototype::instance(Collector { seen }).named("typed"), None)
        .unwrap();

    assert!(system.channels().lookup_typed::<u32>("typed#events").is_ok());
    assert!(matches!(
        system.channels().lookup_typed::<String>("typed#events"),
        Err(IsoError::TypeMismatch { .. })
    ));
    assert!(matches!(
        system.channels().lookup_typed::<u32>("typed#missing"),
        Err(IsoError::UnknownChannel { .. })
    ));
    assert!(system.shutdown(TIMEOUT));
}

#[test]
fn test_concurrent_creation_with_same_name() {
    const RACERS: usize = 8;
    let system = IsoSystem::new().unwrap();
    let seen = Arc::new(Mutex::new(Vec::<u32>::new()));
    let barrier = Arc::new(Barrier::new(RACERS));

    let handles: Vec<_> = (0..RACERS)
        .map(|_| {
            let system = system.clone();
            let seen = seen.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                system
                    .create_isolate(prototype::instance(Collector { seen }).named("contested"), None)
                    .map(|_| ())
            })
        })
        .collect();

    let results: Vec<Result<()>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| *e == IsoError::name_conflict("contested")));
    assert_eq!(system.live_isolates().len(), 1);
    assert_eq!(system.channels().len(), 2);
    assert!(system.shutdown(TIMEOUT));
}

/// Opens a named side channel and seals it on request
struct Gatekeeper;

impl Isolate for Gatekeeper {
    type Event = ();

    fn on_event(&mut self, ctx: &mut Context<'_, Self>, _event: ()) -> Result<()> {
        ctx.seal("door")
    }
}

fn gatekeeper(knocks: Arc<Mutex<Vec<u32>>>) -> impl isolates::Prototype<Isolate = Gatekeeper> {
    prototype::from_fn(move |ctx: &mut Context<'_, Gatekeeper>| {
        ctx.open_channel("door", move |_: &mut Gatekeeper, _: &mut Context<'_, Gatekeeper>, n: u32| {
            knocks.lock().push(n);
            Ok(())
        })?;
        Ok(Gatekeeper)
    })
    .named("keeper")
    .on_scheduler("piggyback")
}

#[test]
fn test_get_unsealed_waits_for_reopened_channel() {
    let system = IsoSystem::new().unwrap();
    let knocks = Arc::new(Mutex::new(Vec::new()));
    let control = system.create_isolate(gatekeeper(knocks.clone()), None).unwrap();

    control.send(()).unwrap();
    let sealed: Channel<u32> = system.channels().lookup_typed("keeper#door").unwrap();
    assert!(sealed.is_sealed());

    // A plain lookup still hands out the sealed channel
    assert!(system.channels().get("keeper#door").is_resolved());

    let unsealed = system.channels().get_unsealed("keeper#door");
    assert!(!unsealed.is_resolved());

    assert!(system.terminate("keeper"));
    assert!(eventually(|| !system.is_name_used("keeper")));
    assert!(!unsealed.is_resolved());

    system.create_isolate(gatekeeper(knocks.clone()), None).unwrap();
    let door: Channel<u32> = unsealed.wait().unwrap().downcast().unwrap();
    assert!(!door.is_sealed());
    assert!(!door.same_channel(&sealed));
    door.send(7).unwrap();
    assert_eq!(*knocks.lock(), vec![7]);
    assert!(system.shutdown(TIMEOUT));
}

/// Forwards events into async code
struct Bridge {
    out: mpsc::UnboundedSender<String>,
}

impl Isolate for Bridge {
    type Event = String;

    fn on_event(&mut self, _ctx: &mut Context<'_, Self>, event: String) -> Result<()> {
        self.out
            .send(event)
            .map_err(|e| IsoError::handler(format!("bridge closed: {e}")))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_lookup_with_tokio_scheduler() {
    let bundle = Bundle::builder()
        .register(Arc::new(TokioScheduler::current("tokio").unwrap()))
        .unwrap()
        .build()
        .unwrap();
    let system = IsoSystem::builder().bundle(bundle).build().unwrap();

    let lookup = system.channels().get("bridge#events");
    let (out, mut received) = mpsc::unbounded_channel();
    system
        .create_isolate(prototype::instance(Bridge { out }).named("bridge"), None)
        .unwrap();

    let channel = lookup.channel::<String>().await.unwrap();
    for word in ["alpha", "beta", "gamma"] {
        channel.send(word.to_string()).unwrap();
    }

    let mut words = Vec::new();
    while words.len() < 3 {
        let word = tokio::time::timeout(TIMEOUT, received.recv())
            .await
            .unwrap()
            .unwrap();
        words.push(word);
    }
    assert_eq!(words, vec!["alpha", "beta", "gamma"]);

    let stopped = tokio::task::block_in_place(|| system.shutdown(TIMEOUT));
    assert!(stopped);
}
