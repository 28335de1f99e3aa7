use crate::alu::Alu;
use crate::{Bus, Firmware, FirmwareState, SimResult, SimulationObserver};
use std::sync::Arc;

const II: u8 = 12;
const JJ: u8 = 13;
const A: u8 = 12;
const B: u8 = 13;

/// One self-checking assertion, evaluated on the 8-bit ALU.
#[derive(Debug, Clone, Copy)]
pub struct Check {
    /// The C expression being checked.
    pub expr: &'static str,
    /// Value the expression must produce; anything else halts.
    pub expect: bool,
    pub eval: fn(&mut Alu) -> bool,
}

impl Check {
    pub fn passes(&self, alu: &mut Alu) -> bool {
        (self.eval)(alu) == self.expect
    }
}

/// Regression checks for the compiler's integer lowering: unsigned
/// comparisons, the basic ALU operations and pre-increment/decrement.
pub const ARITHMETIC_CHECKS: &[Check] = &[
    Check { expr: "12U == 13U", expect: false, eval: |alu| alu.compare(12, 13).is_eq() },
    Check { expr: "12U > 13U", expect: false, eval: |alu| alu.compare(12, 13).is_gt() },
    Check { expr: "12U >= 13U", expect: false, eval: |alu| alu.compare(12, 13).is_ge() },
    Check { expr: "13U < 12U", expect: false, eval: |alu| alu.compare(13, 12).is_lt() },
    Check { expr: "13U <= 12U", expect: false, eval: |alu| alu.compare(13, 12).is_le() },
    Check { expr: "12U != 12U", expect: false, eval: |alu| alu.compare(12, 12).is_ne() },
    Check {
        expr: "12+13 == 25",
        expect: true,
        eval: |alu| {
            let r = alu.add(12, 13);
            alu.compare(r, 25).is_eq()
        },
    },
    Check {
        expr: "13-12 == 1",
        expect: true,
        eval: |alu| {
            let r = alu.sub(13, 12);
            alu.compare(r, 1).is_eq()
        },
    },
    Check {
        expr: "12<<1 == 24",
        expect: true,
        eval: |alu| {
            let r = alu.shl(12, 1);
            alu.compare(r, 24).is_eq()
        },
    },
    Check {
        expr: "12>>1 == 6",
        expect: true,
        eval: |alu| {
            let r = alu.shr(12, 1);
            alu.compare(r, 6).is_eq()
        },
    },
    Check {
        expr: "12|13 == 13",
        expect: true,
        eval: |alu| {
            let r = alu.orr(12, 13);
            alu.compare(r, 13).is_eq()
        },
    },
    Check {
        expr: "12&13 == 12",
        expect: true,
        eval: |alu| {
            let r = alu.and(12, 13);
            alu.compare(r, 12).is_eq()
        },
    },
    Check {
        expr: "12^13 == 1",
        expect: true,
        eval: |alu| {
            let r = alu.eor(12, 13);
            alu.compare(r, 1).is_eq()
        },
    },
    // testinc(ii, jj): both arguments are copies, the caller's values survive.
    Check {
        expr: "++ii == 13",
        expect: true,
        eval: |alu| {
            let r = alu.inc(II);
            alu.compare(r, 13).is_eq()
        },
    },
    Check {
        expr: "--ii == 12",
        expect: true,
        eval: |alu| {
            let up = alu.inc(II);
            let r = alu.dec(up);
            alu.compare(r, 12).is_eq()
        },
    },
    Check {
        expr: "++jj == 14",
        expect: true,
        eval: |alu| {
            let r = alu.inc(JJ);
            alu.compare(r, 14).is_eq()
        },
    },
    Check {
        expr: "--jj == 13",
        expect: true,
        eval: |alu| {
            let up = alu.inc(JJ);
            let r = alu.dec(up);
            alu.compare(r, 13).is_eq()
        },
    },
    Check { expr: "ii == jj", expect: false, eval: |alu| alu.compare(II, JJ).is_eq() },
    Check { expr: "ii != ii", expect: false, eval: |alu| alu.compare(II, II).is_ne() },
    Check { expr: "a > b", expect: false, eval: |alu| alu.compare(A, B).is_gt() },
    Check { expr: "a >= b", expect: false, eval: |alu| alu.compare(A, B).is_ge() },
    Check { expr: "b < a", expect: false, eval: |alu| alu.compare(B, A).is_lt() },
    Check { expr: "b <= a", expect: false, eval: |alu| alu.compare(B, A).is_le() },
    Check { expr: "a != a", expect: false, eval: |alu| alu.compare(A, A).is_ne() },
];

/// Runs one check per step. A failing check sends the program into the
/// error loop, where it stays until reset.
#[derive(Debug, Clone)]
pub struct SelfTest {
    checks: Vec<Check>,
    next: usize,
    alu: Alu,
    state: FirmwareState,
    error_spins: u64,
}

impl Default for SelfTest {
    fn default() -> Self {
        Self::new()
    }
}

impl SelfTest {
    pub fn new() -> Self {
        Self::with_checks(ARITHMETIC_CHECKS.to_vec())
    }

    pub fn with_checks(checks: Vec<Check>) -> Self {
        let mut test = Self {
            checks,
            next: 0,
            alu: Alu::new(),
            state: FirmwareState::Running,
            error_spins: 0,
        };
        test.reset();
        test
    }

    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    pub fn passed(&self) -> usize {
        match self.state {
            FirmwareState::Halted { check } => check,
            _ => self.next,
        }
    }

    pub fn failed_check(&self) -> Option<&Check> {
        match self.state {
            FirmwareState::Halted { check } => self.checks.get(check),
            _ => None,
        }
    }

    /// Steps spent in the error loop so far.
    pub fn error_spins(&self) -> u64 {
        self.error_spins
    }
}

impl Firmware for SelfTest {
    fn name(&self) -> &'static str {
        "selftest"
    }

    fn reset(&mut self) {
        self.next = 0;
        self.alu = Alu::new();
        self.error_spins = 0;
        self.state = if self.checks.is_empty() {
            FirmwareState::Finished
        } else {
            FirmwareState::Running
        };
    }

    fn step(
        &mut self,
        _bus: &mut dyn Bus,
        _observers: &[Arc<dyn SimulationObserver>],
    ) -> SimResult<()> {
        match self.state {
            FirmwareState::Halted { .. } => {
                // while (1);
                self.error_spins += 1;
            }
            FirmwareState::Finished => {}
            FirmwareState::Running => {
                let check = self.checks[self.next];
                if check.passes(&mut self.alu) {
                    tracing::debug!("selftest: [{}] {} ok", self.next, check.expr);
                    self.next += 1;
                    if self.next == self.checks.len() {
                        tracing::info!("selftest: all {} checks passed", self.checks.len());
                        self.state = FirmwareState::Finished;
                    }
                } else {
                    tracing::warn!(
                        "selftest: [{}] {} is not {}, entering error loop",
                        self.next,
                        check.expr,
                        check.expect
                    );
                    self.state = FirmwareState::Halted { check: self.next };
                }
            }
        }
        Ok(())
    }

    fn state(&self) -> FirmwareState {
        self.state
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "passed": self.passed(),
            "total": self.checks.len(),
            "failed": self.failed_check().map(|c| c.expr),
            "error_spins": self.error_spins,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::IoBus;

    fn run_to_end(test: &mut SelfTest, max: usize) {
        let mut bus = IoBus::stock().unwrap();
        for _ in 0..max {
            test.step(&mut bus, &[]).unwrap();
        }
    }

    #[test]
    fn test_every_seeded_check_holds() {
        let mut alu = Alu::new();
        for check in ARITHMETIC_CHECKS {
            assert!(check.passes(&mut alu), "{} should be {}", check.expr, check.expect);
        }
    }

    #[test]
    fn test_finishes_after_one_step_per_check() {
        let mut test = SelfTest::new();
        let total = ARITHMETIC_CHECKS.len();
        let mut bus = IoBus::stock().unwrap();
        for _ in 0..total - 1 {
            test.step(&mut bus, &[]).unwrap();
            assert_eq!(test.state(), FirmwareState::Running);
        }
        test.step(&mut bus, &[]).unwrap();
        assert_eq!(test.state(), FirmwareState::Finished);
        assert_eq!(test.passed(), total);
    }

    #[test]
    fn test_failure_halts_forever() {
        let mut checks = ARITHMETIC_CHECKS[..3].to_vec();
        checks.push(Check {
            expr: "12+13 == 26",
            expect: true,
            eval: |alu| {
                let r = alu.add(12, 13);
                alu.compare(r, 26).is_eq()
            },
        });
        checks.extend_from_slice(&ARITHMETIC_CHECKS[3..5]);

        let mut test = SelfTest::with_checks(checks);
        run_to_end(&mut test, 50);

        assert_eq!(test.state(), FirmwareState::Halted { check: 3 });
        assert_eq!(test.passed(), 3);
        assert_eq!(test.failed_check().unwrap().expr, "12+13 == 26");
        // Steps 5..50 all spin in the error loop.
        assert_eq!(test.error_spins(), 46);

        test.reset();
        assert_eq!(test.state(), FirmwareState::Running);
        assert_eq!(test.error_spins(), 0);
    }

    #[test]
    fn test_empty_suite_is_finished() {
        let test = SelfTest::with_checks(Vec::new());
        assert_eq!(test.state(), FirmwareState::Finished);
    }
}
