//! Size generator: advances the process-wide item-size distribution by
//! one draw whenever triggered. A size generator is always oneshot — the
//! only way to advance it is the call generator signalling
//! [`EventType::GenSizeTrigger`] right before building a request, so every
//! call sees a freshly drawn size.

use crate::event::{Event, EventType};
use crate::runtime::Runtime;

fn on_trigger(rt: &mut Runtime, event: Event) {
    let Event::GenSizeTrigger = event else { return };
    rt.advance_size_distribution();
    rt.signal(Event::GenSizeFire);
}

pub fn init(rt: &mut Runtime) {
    rt.bus.register(EventType::GenSizeTrigger, on_trigger);
}

#[cfg(test)]
mod tests {
    use crate::config::{test_spec, Config};
    use crate::event::Event;
    use crate::runtime::Runtime;

    #[test]
    fn trigger_draws_a_fresh_size() {
        let mut spec = test_spec();
        spec.sizes = "u10,20".into();
        let mut rt = Runtime::new(Config::build(spec).unwrap()).unwrap();
        super::init(&mut rt);

        rt.signal(Event::GenSizeTrigger);
        let size = rt.size_gen_current();
        assert!((10..20).contains(&size), "size {size} out of [10, 20)");
    }

    #[test]
    fn deterministic_size_is_stable() {
        let mut spec = test_spec();
        spec.sizes = "d64".into();
        let mut rt = Runtime::new(Config::build(spec).unwrap()).unwrap();
        super::init(&mut rt);

        rt.signal(Event::GenSizeTrigger);
        assert_eq!(rt.size_gen_current(), 64);
        rt.signal(Event::GenSizeTrigger);
        assert_eq!(rt.size_gen_current(), 64);
    }
}
