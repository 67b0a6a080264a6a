// Wake flag between ISRs and the main loop
//
// An ISR that posted or polled signals the flag; the main loop takes it
// before deciding whether to sleep. Taking is done under a critical
// section because riscv32imc has no atomic swap.
//
// Main loop shape:
//   loop {
//       while sched.run() > 0 {}
//       if !WAKE.take() { wait_for_interrupt(); }
//   }
// A signal raised between run() going idle and take() is not lost: take
// sees it and the loop goes round again instead of sleeping.

use core::sync::atomic::{AtomicBool, Ordering};

pub struct Wake {
    flag: AtomicBool,
}

impl Wake {
    pub const fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn signal(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// True if signalled since the last take. Clears the flag.
    pub fn take(&self) -> bool {
        critical_section::with(|_| {
            let set = self.flag.load(Ordering::Acquire);
            if set {
                self.flag.store(false, Ordering::Relaxed);
            }
            set
        })
    }

    /// Sleep until signalled, then clear.
    pub fn wait(&self) {
        while !self.take() {
            wait_for_interrupt();
        }
    }
}

impl Default for Wake {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
pub fn wait_for_interrupt() {
    #[cfg(any(target_arch = "riscv32", target_arch = "arm"))]
    unsafe {
        core::arch::asm!("wfi", options(nomem, nostack));
    }

    #[cfg(not(any(target_arch = "riscv32", target_arch = "arm")))]
    {
        core::hint::spin_loop();
    }
}
