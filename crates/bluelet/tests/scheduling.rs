// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Scheduling behaviour observed through the public API: spawn, call,
//! join, kill and error propagation.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use bluelet::{co, run, Coroutine, Error, Scheduler, Value};

type Log = Rc<RefCell<Vec<&'static str>>>;

fn log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

struct DropMark(Log, &'static str);

impl Drop for DropMark {
    fn drop(&mut self) {
        self.0.borrow_mut().push(self.1);
    }
}

#[derive(Debug, thiserror::Error)]
#[error("quota exceeded by {0}")]
struct QuotaExceeded(u32);

#[test]
fn spawner_continues_before_child_runs() {
    let log = log();
    let (a, b) = (log.clone(), log.clone());
    let root = Coroutine::new(async move {
        co::spawn(Coroutine::new(async move {
            b.borrow_mut().push("b");
            Ok(())
        }))
        .await?;
        a.borrow_mut().push("a1");
        co::null().await?;
        a.borrow_mut().push("a2");
        Ok(())
    });

    run(root).unwrap();
    assert_eq!(*log.borrow(), vec!["a1", "a2", "b"]);
}

#[test]
fn call_yields_the_delegate_end_value() {
    let root = Coroutine::new(async {
        let child = Coroutine::new(async {
            co::end(9).await?;
            Ok(0)
        });
        co::call(child).await
    });
    assert_eq!(run(root).unwrap(), Value::Int(9));
}

#[test]
fn nested_delegation_returns_leaf_value() {
    fn leaf() -> Coroutine {
        Coroutine::new(async {
            co::end(42).await?;
            Ok(())
        })
    }
    fn mid() -> Coroutine {
        Coroutine::new(async { co::call(leaf()).await })
    }

    let root = Coroutine::new(async { Ok(co::call(mid()).await?.into_int()?) });
    assert_eq!(run(root).unwrap(), Value::Int(42));
}

#[test]
fn awaiting_a_coroutine_is_a_call() {
    let root = Coroutine::new(async {
        let v = Coroutine::new(async { Ok("inner") }).await?;
        Ok(format!("got {}", v.as_str().unwrap_or("?")))
    });
    assert_eq!(run(root).unwrap(), Value::from("got inner"));
}

#[test]
fn joiners_resume_after_target_finishes() {
    let log = log();
    let (l_root, l_target, l_other) = (log.clone(), log.clone(), log.clone());

    let root = Coroutine::new(async move {
        let target = Coroutine::new(async move {
            co::sleep(Duration::from_millis(20)).await?;
            l_target.borrow_mut().push("target done");
            Ok(())
        });
        let target_id = target.id();
        co::spawn(target).await?;
        co::spawn(Coroutine::new(async move {
            co::join(target_id).await?;
            l_other.borrow_mut().push("other resumed");
            Ok(())
        }))
        .await?;
        co::join(target_id).await?;
        l_root.borrow_mut().push("root resumed");
        Ok(())
    });

    run(root).unwrap();
    let log = log.borrow();
    assert_eq!(log[0], "target done");
    assert!(log.contains(&"root resumed"));
    assert!(log.contains(&"other resumed"));
    assert_eq!(log.len(), 3);
}

#[test]
fn sleepers_run_concurrently() {
    let root = Coroutine::new(async {
        for ms in [0u64, 200, 600, 1000] {
            co::spawn(Coroutine::new(co::sleep(Duration::from_millis(ms)))).await?;
        }
        Ok(())
    });

    let start = Instant::now();
    run(root).unwrap();
    let elapsed = start.elapsed();
    // Serial sleeping would take 1.8s.
    assert!(elapsed >= Duration::from_millis(1000), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1500), "{:?}", elapsed);
}

#[test]
fn kill_tears_down_delegation_chain() {
    let log = log();
    let (l_top, l_mid, l_bottom) = (log.clone(), log.clone(), log.clone());

    let root = Coroutine::new(async move {
        let top = Coroutine::new(async move {
            let _mark = DropMark(l_top.clone(), "top dropped");
            let mid = Coroutine::new(async move {
                let _mark = DropMark(l_mid.clone(), "mid dropped");
                let bottom = Coroutine::new(async move {
                    let _mark = DropMark(l_bottom, "bottom dropped");
                    co::sleep(Duration::from_secs(3600)).await?;
                    Ok(())
                });
                co::call(bottom).await?;
                l_mid.borrow_mut().push("mid continued");
                Ok(())
            });
            co::call(mid).await?;
            l_top.borrow_mut().push("top continued");
            Ok(())
        });
        let top_id = top.id();
        co::spawn(top).await?;
        co::sleep(Duration::from_millis(10)).await?;
        co::kill(top_id).await?;
        Ok("killed")
    });

    let mut sched = Scheduler::new().unwrap();
    let start = Instant::now();
    assert_eq!(sched.run(root).unwrap(), Value::from("killed"));
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(sched.live_count(), 0);
    assert_eq!(
        *log.borrow(),
        vec!["bottom dropped", "mid dropped", "top dropped"]
    );
}

#[test]
fn killed_coroutine_wakes_its_joiners() {
    let log = log();
    let watcher_log = log.clone();

    let root = Coroutine::new(async move {
        let target = Coroutine::new(async {
            co::sleep(Duration::from_secs(3600)).await?;
            Ok(())
        });
        let target_id = target.id();
        co::spawn(target).await?;

        let watcher = Coroutine::new(async move {
            co::join(target_id).await?;
            watcher_log.borrow_mut().push("watcher woke");
            Ok(())
        });
        let watcher_id = watcher.id();
        co::spawn(watcher).await?;

        co::sleep(Duration::from_millis(10)).await?;
        co::kill(target_id).await?;
        co::join(watcher_id).await?;
        Ok(())
    });

    let start = Instant::now();
    run(root).unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(*log.borrow(), vec!["watcher woke"]);
}

#[test]
fn delegate_error_is_raised_at_call_site() {
    let root = Coroutine::new(async {
        let leaf = Coroutine::new(async { Err::<(), _>(Error::other(QuotaExceeded(3))) });
        let mid = Coroutine::new(async move { co::call(leaf).await });
        match co::call(mid).await {
            Err(e) => {
                let quota = e.downcast_ref::<QuotaExceeded>().map(|q| q.0);
                Ok(Value::from(quota.unwrap_or(0) as i64))
            }
            Ok(v) => Ok(v),
        }
    });
    assert_eq!(run(root).unwrap(), Value::Int(3));
}

#[test]
fn caught_error_lets_delegator_continue() {
    let root = Coroutine::new(async {
        let failed = co::call(Coroutine::new(async { Err::<(), _>(Error::msg("bad input")) }))
            .await
            .is_err();
        co::sleep(Duration::from_millis(1)).await?;
        Ok(failed)
    });
    assert_eq!(run(root).unwrap(), Value::Bool(true));
}

#[test]
fn root_error_escapes_run_and_empties_table() {
    let log = log();
    let l = log.clone();

    let root = Coroutine::new(async move {
        co::spawn(Coroutine::new(async move {
            let _mark = DropMark(l, "sibling dropped");
            co::sleep(Duration::from_secs(3600)).await?;
            Ok(())
        }))
        .await?;
        // Let the sibling reach its sleep before raising.
        co::sleep(Duration::from_millis(1)).await?;
        Err::<(), _>(Error::other(QuotaExceeded(7)))
    });

    let mut sched = Scheduler::new().unwrap();
    let err = sched.run(root).unwrap_err();
    assert_eq!(err.to_string(), "quota exceeded by 7");
    assert!(err.downcast_ref::<QuotaExceeded>().is_some());
    assert_eq!(sched.live_count(), 0);
    assert_eq!(*log.borrow(), vec!["sibling dropped"]);
}

#[test]
fn failed_coroutine_still_wakes_joiners() {
    let log = log();
    let l = log.clone();

    let root = Coroutine::new(async move {
        let doomed = Coroutine::new(async {
            co::sleep(Duration::from_millis(20)).await?;
            Err::<(), _>(Error::msg("doomed"))
        });
        let doomed_id = doomed.id();
        co::spawn(Coroutine::new(async move {
            if co::call(doomed).await.is_err() {
                l.borrow_mut().push("delegator caught");
            }
            Ok(())
        }))
        .await?;
        co::sleep(Duration::from_millis(5)).await?;
        co::join(doomed_id).await?;
        Ok("joined")
    });

    let start = Instant::now();
    assert_eq!(run(root).unwrap(), Value::from("joined"));
    assert!(start.elapsed() >= Duration::from_millis(20));
    assert_eq!(*log.borrow(), vec!["delegator caught"]);
}

#[test]
fn scheduler_is_reusable() {
    let mut sched = Scheduler::new().unwrap();
    for n in 0..3i64 {
        let root = Coroutine::new(async move {
            co::sleep(Duration::from_millis(1)).await?;
            Ok(n)
        });
        assert_eq!(sched.run(root).unwrap(), Value::Int(n));
        assert_eq!(sched.live_count(), 0);
    }
}
