//! Integration tests for systems and the update loop.

use std::{
    any::Any,
    cell::RefCell,
    rc::{Rc, Weak},
};

use sieve_ecs::prelude::*;
use sieve_ecs::MessageHandler;

type Log = Rc<RefCell<Vec<String>>>;

/// Logs every hook it receives under its name.
struct Recorder {
    name: &'static str,
    priority: i32,
    log: Log,
}

impl Recorder {
    fn new(name: &'static str, priority: i32, log: &Log) -> Self {
        Self {
            name,
            priority,
            log: Rc::clone(log),
        }
    }

    fn push(&self, hook: &str) {
        self.log.borrow_mut().push(format!("{}:{hook}", self.name));
    }
}

impl System for Recorder {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn on_added_to_engine(&mut self, _ctx: &SystemContext) {
        self.push("added");
    }

    fn on_removed_from_engine(&mut self, _ctx: &SystemContext) {
        self.push("removed");
    }

    fn update(&mut self, _ctx: &SystemContext, _dt: f64, _frame_delta: f64) {
        self.push("update");
    }

    fn fixed_update(&mut self, _ctx: &SystemContext, _dt: f64) {
        self.push("fixed");
    }

    fn late_update(&mut self, _ctx: &SystemContext, _dt: f64, _frame_delta: f64) {
        self.push("late");
    }

    fn render_update(&mut self, _ctx: &SystemContext, _dt: f64, _frame_delta: f64) {
        self.push("render");
    }
}

#[test]
fn test_systems_run_in_priority_order() {
    let engine = Engine::new();
    let log = Log::default();

    engine.add_system(Recorder::new("b", 5, &log));
    engine.add_system(Recorder::new("a", 1, &log));
    engine.add_system(Recorder::new("c", 5, &log));
    log.borrow_mut().clear();

    engine.update(0.016, 1.0);
    assert_eq!(*log.borrow(), ["a:update", "b:update", "c:update"]);

    log.borrow_mut().clear();
    engine.fixed_update(0.02);
    engine.late_update(0.016, 1.0);
    engine.render_update(0.016, 1.0);
    assert_eq!(*log.borrow(), [
        "a:fixed", "b:fixed", "c:fixed", "a:late", "b:late", "c:late", "a:render", "b:render",
        "c:render"
    ]);
}

#[test]
fn test_add_and_remove_hooks() {
    let engine = Engine::new();
    let log = Log::default();

    let system = engine.add_system(Recorder::new("solo", 0, &log));
    assert_eq!(engine.systems_len(), 1);
    assert!(engine.remove_system(&system));
    assert_eq!(engine.systems_len(), 0);

    engine.update(0.0, 0.0);
    assert_eq!(*log.borrow(), ["solo:added", "solo:removed"]);
}

#[test]
fn test_get_system_by_type() {
    struct Other;
    impl System for Other {}

    let engine = Engine::new();
    let log = Log::default();
    let recorder = engine.add_system(Recorder::new("r", 0, &log));
    engine.add_system(Other);

    let found = engine.get_system::<Recorder>().unwrap();
    assert!(Rc::ptr_eq(&found, &recorder));
    assert!(engine.get_system::<Other>().is_some());

    engine.remove_all_systems();
    assert!(engine.get_system::<Recorder>().is_none());
}

/// Removes a victim system the first time it updates.
struct Assassin {
    victim: Option<Weak<RefCell<Recorder>>>,
}

impl System for Assassin {
    fn priority(&self) -> i32 {
        -1
    }

    fn update(&mut self, ctx: &SystemContext, _dt: f64, _frame_delta: f64) {
        let Some(victim) = self.victim.take().and_then(|weak| weak.upgrade()) else {
            return;
        };
        if let Ok(engine) = ctx.engine() {
            engine.remove_system(&victim);
        }
    }
}

#[test]
fn test_system_removed_mid_loop_is_skipped() {
    let engine = Engine::new();
    let log = Log::default();

    let victim = engine.add_system(Recorder::new("victim", 0, &log));
    engine.add_system(Assassin {
        victim: Some(Rc::downgrade(&victim)),
    });
    log.borrow_mut().clear();

    engine.update(0.016, 1.0);
    assert_eq!(*log.borrow(), ["victim:removed"]);
}

/// Removes itself from the engine during its own update.
struct Quitter {
    me: Option<Weak<RefCell<Quitter>>>,
    log: Log,
}

impl System for Quitter {
    fn on_removed_from_engine(&mut self, ctx: &SystemContext) {
        // The context still reaches the engine during the hook.
        let attached = ctx.engine().is_ok();
        self.log.borrow_mut().push(format!("removed(attached={attached})"));
    }

    fn update(&mut self, ctx: &SystemContext, _dt: f64, _frame_delta: f64) {
        self.log.borrow_mut().push("update:start".to_owned());
        if let (Some(me), Ok(engine)) = (self.me.as_ref().and_then(Weak::upgrade), ctx.engine()) {
            engine.remove_system(&me);
        }
        self.log.borrow_mut().push("update:end".to_owned());
    }
}

#[test]
fn test_self_removal_defers_removed_hook() {
    let engine = Engine::new();
    let log = Log::default();

    let quitter = engine.add_system(Quitter {
        me: None,
        log: Rc::clone(&log),
    });
    quitter.borrow_mut().me = Some(Rc::downgrade(&quitter));

    engine.update(0.016, 1.0);

    assert_eq!(*log.borrow(), [
        "update:start",
        "update:end",
        "removed(attached=true)"
    ]);
    assert_eq!(engine.systems_len(), 0);

    engine.update(0.016, 1.0);
    assert_eq!(log.borrow().len(), 3);
}

/// Owns a query and dispatches a message per member each update.
struct Announcer {
    players: Query,
}

impl System for Announcer {
    fn on_added_to_engine(&mut self, ctx: &SystemContext) {
        if let Ok(engine) = ctx.engine() {
            engine.add_query(&self.players);
        }
    }

    fn on_removed_from_engine(&mut self, ctx: &SystemContext) {
        if let Ok(engine) = ctx.engine() {
            engine.remove_query(&self.players);
        }
    }

    fn update(&mut self, ctx: &SystemContext, _dt: f64, _frame_delta: f64) {
        for player in &self.players {
            let _ = ctx.dispatch(&player.id());
        }
    }
}

#[test]
fn test_system_reads_query_and_dispatches() {
    let engine = Engine::new();
    let received = Rc::new(RefCell::new(Vec::new()));
    let handler: MessageHandler = {
        let received = Rc::clone(&received);
        Rc::new(move |message: &dyn Any| {
            if let Some(id) = message.downcast_ref::<u64>() {
                received.borrow_mut().push(*id);
            }
        })
    };
    engine.subscribe(Topic::of::<u64>(), handler);

    let players = Query::builder().tag("player").build();
    let announcer = engine.add_system(Announcer {
        players: players.clone(),
    });
    assert!(players.is_attached());

    let alice = Entity::new();
    alice.add_tag("player").unwrap();
    let rock = Entity::new();
    engine.add_entities(&[alice.clone(), rock]);

    engine.update(0.016, 1.0);
    assert_eq!(*received.borrow(), [alice.id()]);

    engine.remove_system(&announcer);
    assert!(!players.is_attached());
    assert!(players.is_empty());
}

#[test]
fn test_shared_config_reachable_from_systems() {
    struct TickRate(u32);

    struct Reader {
        seen: Option<u32>,
    }

    impl System for Reader {
        fn update(&mut self, ctx: &SystemContext, _dt: f64, _frame_delta: f64) {
            self.seen = ctx
                .shared_config()
                .ok()
                .and_then(|config| config.get::<TickRate>())
                .map(|rate| rate.borrow().0);
        }
    }

    let engine = Engine::new();
    engine.shared_config().add(TickRate(20));
    let reader = engine.add_system(Reader { seen: None });

    engine.update(0.05, 1.0);
    assert_eq!(reader.borrow().seen, Some(20));
}

#[test]
fn test_clear_keeps_subscriptions_and_shared_config() {
    let engine = Engine::new();
    let log = Log::default();
    engine.add_system(Recorder::new("r", 0, &log));
    let query = Query::new(|_| true);
    engine.add_query(&query);
    engine.add_entity(&Entity::new());

    let handler: MessageHandler = Rc::new(|_: &dyn Any| {});
    engine.subscribe(Topic::value("tick"), handler);

    engine.clear();

    assert_eq!(engine.systems_len(), 0);
    assert!(engine.queries().is_empty());
    assert!(!query.is_attached());
    assert_eq!(engine.entities(), [engine.shared_config()]);
    assert_eq!(engine.dispatch(&"tick"), 1);
    assert!(log.borrow().contains(&"r:removed".to_owned()));
}
