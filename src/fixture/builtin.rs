//! Built-in fixtures.

use std::time::Duration;

use crate::io_loop::{self, EventLoop};

use super::{names, FixtureRegistry};

pub(crate) fn register(registry: &mut FixtureRegistry) {
    registry.register(names::ASYNC_TEST_TIMEOUT, |request| {
        Ok(request.config().async_test_timeout)
    });

    registry.register(names::RESOLVED_DEADLINE, |request| {
        let default = request.get::<Duration>(names::ASYNC_TEST_TIMEOUT)?;
        Ok(request
            .marker()
            .map_or(default, |marker| marker.deadline_or(default)))
    });

    registry.register(names::IO_LOOP, |request| {
        let event_loop: EventLoop = io_loop::acquire(request.loop_options())?;
        let shared = request.shared_loop().clone();
        let released = event_loop.clone();
        request.add_finalizer(move || io_loop::release(&released, &shared));
        Ok(event_loop)
    });

    #[cfg(feature = "http")]
    crate::net::register_fixtures(registry);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::fixture::Request;
    use crate::item::TestItem;
    use crate::marker::GenTest;
    use crate::session::Session;
    use crate::signature::Signature;

    fn item() -> TestItem {
        TestItem::sync("test_builtin", Signature::default(), |_| Ok(()))
    }

    #[test]
    fn test_deadline_uses_marker_first() {
        let session = Session::new(Config::new());
        let item = item().mark(GenTest::new().timeout(Duration::from_millis(10)));
        let mut request = Request::new(&session, &item);

        let deadline = request.get::<Duration>(names::RESOLVED_DEADLINE).unwrap();
        assert_eq!(deadline, Duration::from_millis(10));
    }

    #[test]
    fn test_deadline_uses_fixture_override() {
        let session = Session::new(Config::new().async_test_timeout(Duration::from_secs(9)));
        let item = item()
            .mark(GenTest::new())
            .fixture(names::ASYNC_TEST_TIMEOUT, |_| Ok(Duration::from_secs(2)));
        let mut request = Request::new(&session, &item);

        let deadline = request.get::<Duration>(names::RESOLVED_DEADLINE).unwrap();
        assert_eq!(deadline, Duration::from_secs(2));
    }

    #[test]
    fn test_deadline_uses_config() {
        let session = Session::new(Config::new().async_test_timeout(Duration::from_secs(9)));
        let item = item().mark(GenTest::new());
        let mut request = Request::new(&session, &item);

        let deadline = request.get::<Duration>(names::RESOLVED_DEADLINE).unwrap();
        assert_eq!(deadline, Duration::from_secs(9));
    }

    #[test]
    fn test_io_loop_released_on_finish() {
        let session = Session::new(Config::new());
        let item = item();
        let mut request = Request::new(&session, &item);

        let io_loop = request.get::<EventLoop>(names::IO_LOOP).unwrap();
        assert!(io_loop.is_current());

        request.finish().unwrap();
        assert!(io_loop.is_closed());
        assert!(EventLoop::current().is_none());
    }

    #[test]
    fn test_shared_io_loop_left_open() {
        let session = Session::new(Config::new());
        let item = item();
        let mut request = Request::new(&session, &item);

        let io_loop = request.get::<EventLoop>(names::IO_LOOP).unwrap();
        session.shared_loop().install(&io_loop);

        request.finish().unwrap();
        assert!(!io_loop.is_closed());
        assert!(EventLoop::current().is_none());
    }
}
