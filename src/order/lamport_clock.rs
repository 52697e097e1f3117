use super::{LogicalClock, Timestamp};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LamportClock {
    clk: Timestamp,
}

impl LamportClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogicalClock for LamportClock {
    fn tick(&mut self) -> Timestamp {
        self.clk += 1;
        self.clk
    }
    fn observe(&mut self, remote: Timestamp) -> Timestamp {
        self.clk = self.clk.max(remote) + 1;
        self.clk
    }
    fn now(&self) -> Timestamp {
        self.clk
    }
}
