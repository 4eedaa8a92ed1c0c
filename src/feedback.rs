// LED patterns shown during a cycle

use crate::traits::{Clock, Indicator};

/// What the node wants to tell whoever is looking at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Awake,
    Sent,
    SendFailed,
    SensorFault,
    Fatal,
}

impl Signal {
    /// (on-off flashes, half period in ms). `Fatal` is counted in toggles.
    fn pattern(self) -> (usize, u64) {
        match self {
            Signal::Awake => (2, 300),
            Signal::Sent => (3, 100),
            Signal::SendFailed => (5, 100),
            Signal::SensorFault => (10, 100),
            Signal::Fatal => (20, 100),
        }
    }
}

pub async fn flash<I: Indicator, C: Clock>(led: &mut I, clock: &C, times: usize, half_period_ms: u64) {
    for _ in 0..times {
        led.set(true);
        clock.delay_ms(half_period_ms).await;
        led.set(false);
        clock.delay_ms(half_period_ms).await;
    }
}

pub async fn show<I: Indicator, C: Clock>(led: &mut I, clock: &C, signal: Signal) {
    let (times, half_period_ms) = signal.pattern();
    if signal == Signal::Fatal {
        for _ in 0..times {
            led.toggle();
            clock.delay_ms(half_period_ms).await;
        }
    } else {
        flash(led, clock, times, half_period_ms).await;
    }
}
