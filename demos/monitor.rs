//! Touch monitor example - print finger lifecycles and device changes.
//!
//! Run with: cargo run --example monitor
//!
//! Pass `--tap` to also observe the pointer and keyboard through a
//! listen-only event tap (requires Accessibility permission).
//!
//! Pass `--coast` to print the glide a trackpad flick would produce once the
//! last finger lifts. It watches pointer motion, so it also installs the tap.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use touchwatch::coast::TICK_INTERVAL;
use touchwatch::{Coaster, Event, EventMask, MonitorConfig, TapConfig, TapOutcome};

fn main() {
    println!("touchwatch monitor example");
    println!("==========================\n");
    println!("Press Ctrl+C to exit.\n");

    let tap = std::env::args().any(|arg| arg == "--tap");
    let coast = std::env::args().any(|arg| arg == "--coast");

    let mut config = MonitorConfig::default();
    if tap || coast {
        config = config.with_tap(TapConfig::listening(EventMask::ALL));
    }
    let mut coaster = Coaster::default();
    let mut last_tick = Instant::now();

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");

    let (mut handle, events) = touchwatch::start(config).expect("Failed to start monitor");

    while running.load(Ordering::SeqCst) {
        let timeout = if coast {
            TICK_INTERVAL
        } else {
            Duration::from_millis(100)
        };
        let next = events.next_timeout(timeout);

        if coast {
            let dt = last_tick.elapsed().as_secs_f64();
            last_tick = Instant::now();
            if let Some(step) = coaster.step(dt) {
                println!(
                    "coast ({:+}, {:+}) -> ({:.1}, {:.1}){}",
                    step.pixel_dx,
                    step.pixel_dy,
                    step.x,
                    step.y,
                    if step.finished { " stop" } else { "" }
                );
            }
        }

        let event = match next {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(()) => {
                println!("Queue closed, monitor stopped.");
                break;
            }
        };

        if coast && coaster.on_event(&event) {
            let (vx, vy) = coaster.velocity();
            println!("release at ({:.0}, {:.0}) pt/s", vx, vy);
        }
        if coast && !tap && matches!(event, Event::Tap { .. }) {
            continue;
        }

        match event {
            Event::TouchBegin(s) => println!(
                "[{}] finger {} down at ({:.3}, {:.3})",
                s.device,
                s.contact.finger_id,
                s.contact.normalized.position.x,
                s.contact.normalized.position.y
            ),
            Event::TouchUpdate(s) => println!(
                "[{}] finger {} {:?} at ({:.3}, {:.3}) quality {:.2}",
                s.device,
                s.contact.finger_id,
                s.contact.state,
                s.contact.normalized.position.x,
                s.contact.normalized.position.y,
                s.contact.quality
            ),
            Event::TouchEnd(s) => println!("[{}] finger {} up", s.device, s.contact.finger_id),
            Event::DeviceArrived(info) => println!("device {} attached", info.id),
            Event::DeviceDeparted(info) => println!("device {} detached", info.id),
            Event::Tap { event, outcome } => {
                if outcome != TapOutcome::PassedThrough || event.kind.is_keyboard() {
                    println!("tap {:?} keycode {:?} -> {:?}", event.kind, event.keycode, outcome);
                }
            }
            Event::TapReenabled(reason) => println!("event tap re-enabled after {:?}", reason),
        }
    }

    if events.dropped() > 0 {
        println!("{} events dropped by a full queue", events.dropped());
    }
    handle.stop().expect("Failed to stop monitor");
    println!("Stopped.");
}
