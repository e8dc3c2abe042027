//! RAII guard for disabling/restoring interrupts

use crate::hal::InterruptControl;

/// Masks interrupts on construction and restores the previous state on
/// drop, on every exit path including early returns and unwinding.
///
/// Guards nest: only the outermost one re-enables interrupts.
pub struct InterruptGuard<'a> {
    control: &'a dyn InterruptControl,
    was_enabled: bool,
}

impl<'a> InterruptGuard<'a> {
    pub fn new(control: &'a dyn InterruptControl) -> Self {
        let was_enabled = control.disable();
        Self {
            control,
            was_enabled,
        }
    }

    /// Whether interrupts were enabled when this guard was taken
    pub fn was_enabled(&self) -> bool {
        self.was_enabled
    }
}

impl Drop for InterruptGuard<'_> {
    fn drop(&mut self) {
        if self.was_enabled {
            self.control.enable();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::MockInterrupts;

    #[test]
    fn test_guard_restores_enabled_state() {
        let irq = MockInterrupts::new();
        {
            let _guard = InterruptGuard::new(&irq);
            assert!(!irq.are_enabled());
        }
        assert!(irq.are_enabled());
    }

    #[test]
    fn test_nested_guards_only_outer_enables() {
        let irq = MockInterrupts::new();
        let outer = InterruptGuard::new(&irq);
        {
            let inner = InterruptGuard::new(&irq);
            assert!(!inner.was_enabled());
        }
        assert!(!irq.are_enabled());
        drop(outer);
        assert!(irq.are_enabled());
    }

    #[test]
    fn test_guard_keeps_disabled_state() {
        let irq = MockInterrupts::new();
        irq.disable();
        {
            let _guard = InterruptGuard::new(&irq);
        }
        assert!(!irq.are_enabled());
    }
}
