//! STM32F401 board support shared by the demos
//!
//! TIM2 is a 32-bit timer: prescaled to 1 MHz it is the kernel clock
//! directly. Channel 1 is the deadline comparator and the update event
//! signals a counter wrap.

// Not every demo drives the LED
#![allow(dead_code)]

use cortex_m::peripheral::NVIC;
use eckernel::pac;
use eckernel::time::ClockSource;
use eckernel::Kernel;

/// HSI after reset, and APB1 is not divided
const TIMER_INPUT_HZ: u32 = 16_000_000;

pub struct Tim2Clock;

impl Tim2Clock {
    /// Start the counter at zero and unmask the interrupt
    pub fn init(&self) {
        pac::RCC.apb1enr().modify(|w| w.set_tim2en(true));

        let tim = pac::TIM2;
        tim.cr1().modify(|w| w.set_cen(false));
        tim.psc().write_value((TIMER_INPUT_HZ / 1_000_000 - 1) as u16);
        tim.arr().write_value(u32::MAX);
        // Load the prescaler now rather than at the first wrap
        tim.egr().write(|w| w.set_ug(true));
        tim.sr().write_value(Default::default());
        tim.cnt().write_value(0);
        tim.dier().modify(|w| w.set_uie(true));
        tim.cr1().modify(|w| w.set_cen(true));

        // SAFETY: the handler only touches the kernel clock.
        unsafe {
            let mut nvic = cortex_m::Peripherals::steal().NVIC;
            nvic.set_priority(pac::Interrupt::TIM2, eckernel::CFG_TIMER_IRQ_PRIO);
            NVIC::unmask(pac::Interrupt::TIM2);
        }
    }
}

impl ClockSource for Tim2Clock {
    #[inline]
    fn read(&self) -> u32 {
        pac::TIM2.cnt().read()
    }

    fn set_target(&self, target: u32) {
        pac::TIM2.ccr(0).write_value(target);
        pac::TIM2.sr().modify(|w| w.set_ccif(0, false));
        pac::TIM2.dier().modify(|w| w.set_ccie(0, true));
    }

    fn clear_target(&self) {
        pac::TIM2.dier().modify(|w| w.set_ccie(0, false));
    }

    fn trigger(&self) {
        NVIC::pend(pac::Interrupt::TIM2);
    }
}

pub static CLOCK: Tim2Clock = Tim2Clock;

#[no_mangle]
extern "C" fn TIM2() {
    let sr = pac::TIM2.sr().read();
    let overflow = sr.uif();
    pac::TIM2.sr().modify(|w| {
        w.set_uif(false);
        w.set_ccif(0, false);
    });
    if let Some(kernel) = Kernel::registered() {
        kernel.on_timer_interrupt(overflow);
    }
}

pub fn led_init() {
    pac::RCC.ahb1enr().modify(|w| w.set_gpioaen(true));
    pac::GPIOA.moder().modify(|w| w.set_moder(5, pac::gpio::vals::Moder::OUTPUT));
    pac::GPIOA.otyper().modify(|w| w.set_ot(5, pac::gpio::vals::Ot::PUSHPULL));
}

pub fn led_set(on: bool) {
    pac::GPIOA.bsrr().write(|w| {
        if on {
            w.set_bs(5, true)
        } else {
            w.set_br(5, true)
        }
    });
}
