use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use tripsync_core::{Clock, ManualClock, Millis};
use tripsync_engine::EngineError;
use tripsync_storage::StorageError;

use crate::TestDevice;
use crate::hub::RemoteHub;

/// Step size of [`TestNetwork::run_for`].
const TICK_MS: Millis = 100;

/// Devices sharing one remote hub and one virtual clock.
pub struct TestNetwork {
    clock: ManualClock,
    hub: Rc<RefCell<RemoteHub>>,
    devices: Vec<TestDevice>,
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new(1_000)
    }
}

impl TestNetwork {
    pub fn new(start: Millis) -> Self {
        Self {
            clock: ManualClock::new(start),
            hub: RemoteHub::shared(),
            devices: Vec::new(),
        }
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    pub fn now(&self) -> Millis {
        self.clock.now_ms()
    }

    pub fn hub(&self) -> Ref<'_, RemoteHub> {
        self.hub.borrow()
    }

    pub fn hub_mut(&self) -> RefMut<'_, RemoteHub> {
        self.hub.borrow_mut()
    }

    pub fn shared_hub(&self) -> &Rc<RefCell<RemoteHub>> {
        &self.hub
    }

    pub fn add_device(&mut self) -> Result<usize, StorageError> {
        let device = TestDevice::new(&self.hub, &self.clock)?;
        let index = self.devices.len();
        self.devices.push(device);
        Ok(index)
    }

    pub fn device(&self, index: usize) -> &TestDevice {
        &self.devices[index]
    }

    pub fn device_mut(&mut self, index: usize) -> &mut TestDevice {
        &mut self.devices[index]
    }

    /// Two distinct devices at once.
    pub fn pair_mut(&mut self, a: usize, b: usize) -> (&mut TestDevice, &mut TestDevice) {
        assert_ne!(a, b, "pair_mut needs two different devices");
        if a < b {
            let (left, right) = self.devices.split_at_mut(b);
            (&mut left[a], &mut right[0])
        } else {
            let (left, right) = self.devices.split_at_mut(a);
            (&mut right[0], &mut left[b])
        }
    }

    /// Poll every device once, in index order.
    pub fn poll_all(&mut self) -> Result<(), EngineError> {
        for device in &mut self.devices {
            device.poll()?;
        }
        Ok(())
    }

    /// Advance virtual time in small steps, polling every device at each.
    pub fn run_for(&mut self, duration_ms: Millis) -> Result<(), EngineError> {
        let mut elapsed = 0;
        while elapsed < duration_ms {
            let step = TICK_MS.min(duration_ms - elapsed);
            self.clock.advance(step);
            elapsed += step;
            self.poll_all()?;
        }
        Ok(())
    }
}
