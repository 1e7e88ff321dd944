#![no_std]
#![no_main]

mod board;

use core::fmt::Write;

use embassy_executor::Spawner;
use embassy_futures::yield_now;
use embassy_stm32::adc::{Adc, SampleTime, VrefInt};
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_stm32::peripherals::{ADC1, DMA1_CH1, DMA1_CH3, PA2, PA3, USART3};
use embassy_stm32::usart::{Config as UsartConfig, Uart, UartRx, UartTx};
use embassy_stm32::{bind_interrupts, peripherals};
use embassy_time::{Delay, Duration, Ticker, Timer};
use {defmt_rtt as _, panic_probe as _};

use vortexflow::config::{FlowConfig, RX_QUEUE_LEN, SAMPLE_WINDOW, TICK_PERIOD_US, TX_QUEUE_LEN};
use vortexflow::{
    flow, Channel, Console, DebugProbe, SampleSource, SchedFlags, Scheduler, SystemStatus,
    TransportQueue,
};

use crate::board::Board;

// ── Tick/foreground shared state ──────────────────────────────────────────────
//  The serial rings and scheduler flags are the only data crossing contexts;
//  everything else is owned by exactly one task.
static RX_QUEUE: TransportQueue<RX_QUEUE_LEN> = TransportQueue::new();
static TX_QUEUE: TransportQueue<TX_QUEUE_LEN> = TransportQueue::new();
static SCHED_FLAGS: SchedFlags = SchedFlags::new();

// ── Interrupt bindings ────────────────────────────────────────────────────────
bind_interrupts!(struct Irqs {
    USART3 => embassy_stm32::usart::InterruptHandler<peripherals::USART3>;
});

// ── Tick task ─────────────────────────────────────────────────────────────────

/// The 100 µs tick. Owns the scheduler; publishes work through SCHED_FLAGS.
#[embassy_executor::task]
async fn tick_task() {
    let mut scheduler = Scheduler::new();
    let mut ticker = Ticker::every(Duration::from_micros(TICK_PERIOD_US as u64));
    loop {
        ticker.next().await;
        scheduler.tick(&SCHED_FLAGS);
    }
}

// ── Serial bridge tasks ───────────────────────────────────────────────────────

/// Console input: USART3 → receive ring. A full ring drops the byte and the
/// ring counts the overrun.
#[embassy_executor::task]
async fn serial_rx_task(mut rx: UartRx<'static, USART3, DMA1_CH1>) {
    let mut byte = [0u8; 1];
    loop {
        if rx.read(&mut byte).await.is_ok() {
            let _ = RX_QUEUE.put(byte[0]);
        }
    }
}

/// Console output: transmit ring → USART3, drained in chunks.
#[embassy_executor::task]
async fn serial_tx_task(mut tx: UartTx<'static, USART3, DMA1_CH3>) {
    let mut chunk = [0u8; 64];
    loop {
        let n = TX_QUEUE.get_bytes(&mut chunk);
        if n == 0 {
            Timer::after(Duration::from_millis(1)).await;
            continue;
        }
        let _ = tx.write(&chunk[..n]).await;
    }
}

// ── ADC sampling ──────────────────────────────────────────────────────────────

/// The three conversion sources behind [`SampleSource`]: the internal
/// reference, the vortex pressure sensor on PA2 and the temperature sensor
/// on PA3.
struct AdcSampler<'a> {
    adc: Adc<'a, ADC1>,
    vrefint: VrefInt,
    vortex: PA2,
    temp: PA3,
}

impl SampleSource for AdcSampler<'_> {
    fn read_channel(&mut self, channel: Channel) -> u16 {
        // 12-bit conversions are left-aligned to the 16-bit range the
        // pipeline (crossing center, temperature fit) is calibrated for.
        let raw = match channel {
            Channel::Reference => self.adc.read(&mut self.vrefint),
            Channel::Vortex => self.adc.read(&mut self.vortex),
            Channel::Temperature => self.adc.read(&mut self.temp),
        };
        raw << 4
    }
}

// ── Debug probe ───────────────────────────────────────────────────────────────

/// Console debug dumps backed by the live Cortex-M.
struct McuProbe;

impl DebugProbe for McuProbe {
    fn registers(&mut self, out: &mut [u32; 16]) {
        // Only the stack pointer is meaningfully recoverable from thread
        // context; the general registers are whatever the compiler left.
        *out = [0; 16];
        out[13] = cortex_m::register::msp::read();
    }

    fn read_word(&mut self, addr: u32) -> u32 {
        // Operator-requested raw read. An unmapped address hard-faults,
        // exactly like poking it from a debugger would.
        unsafe { core::ptr::read_volatile(addr as *const u32) }
    }

    fn stack(&mut self, out: &mut [u32]) -> usize {
        let sp = cortex_m::register::msp::read() as *const u32;
        for (i, w) in out.iter_mut().enumerate() {
            // Words above the current stack pointer, inside the stack region.
            *w = unsafe { core::ptr::read_volatile(sp.add(i)) };
        }
        out.len()
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // 1. Board init (168 MHz PLL)
    let board = Board::init();
    let p = board.p;

    defmt::info!("vortex flow meter boot, core clock {} Hz", board::CORE_CLOCK_HZ);

    // 2. Console USART3 @ 115200 (TX=PB10, RX=PB11)
    let mut usart_config = UsartConfig::default();
    usart_config.baudrate = 115_200;
    let uart = Uart::new(
        p.USART3, p.PB11, p.PB10,
        Irqs,
        p.DMA1_CH3, p.DMA1_CH1,
        usart_config,
    )
    .unwrap();
    let (uart_tx, uart_rx) = uart.split();

    // 3. ADC1: internal reference + vortex (PA2) + temperature (PA3)
    let mut delay = Delay;
    let mut adc = Adc::new(p.ADC1, &mut delay);
    adc.set_sample_time(SampleTime::CYCLES112);
    let vrefint = adc.enable_vrefint();
    let mut sampler = AdcSampler {
        adc,
        vrefint,
        vortex: p.PA2,
        temp: p.PA3,
    };

    // 4. Heartbeat LED (PC13)
    let mut led = Output::new(p.PC13, Level::High, Speed::Low);

    // 5. Spawn the tick and the serial bridges
    spawner.spawn(tick_task()).unwrap();
    spawner.spawn(serial_rx_task(uart_rx)).unwrap();
    spawner.spawn(serial_tx_task(uart_tx)).unwrap();

    // 6. Startup banner. The internal reference doubles as an ADC sanity
    //    check: out of band means the ADC is suspect, but the meter still
    //    runs in degraded mode rather than bricking the console.
    let vref = sampler.read_channel(Channel::Reference);
    let adc_ok = (0x3000..0x9000).contains(&vref);
    if !adc_ok {
        defmt::warn!("vref sanity check failed: {=u16:x}", vref);
    }

    let mut banner = heapless::String::<128>::new();
    let _ = write!(
        banner,
        "\r\nSystem Reset\r\nVortex Flow Meter Ver: {}\r\nCore clock: {}\r\nADC cal: {}\r\n",
        vortexflow::VERSION,
        board::CORE_CLOCK_HZ,
        if adc_ok { "OK" } else { "FAILED (degraded)" },
    );
    TX_QUEUE.put_bytes(banner.as_bytes());

    // 7. Foreground executive
    let config = FlowConfig::new();
    let mut status = SystemStatus::new(board::CORE_CLOCK_HZ);
    let mut console = Console::new(&TX_QUEUE, &SCHED_FLAGS, McuProbe);
    console.show_menu();

    let mut window: heapless::Vec<u16, SAMPLE_WINDOW> = heapless::Vec::new();
    let mut scratch = [0u16; SAMPLE_WINDOW];

    loop {
        // Operator input first: commands must stay responsive regardless of
        // where the sample window stands.
        while let Some(b) = RX_QUEUE.try_get() {
            console.process_byte(b, &status);
        }

        // One conversion pass per tick request. A request missed while the
        // pipeline ran below is replaced, not queued.
        if SCHED_FLAGS.take_adc_request() {
            for ch in Channel::ALL {
                status.adc[ch.index()] = sampler.read_channel(ch);
            }
            let _ = window.push(status.adc[Channel::Vortex.index()]);

            if window.is_full() {
                let freq = flow::vortex_frequency(&window, &mut scratch, &config);
                let temp = flow::temperature_c(status.adc[Channel::Temperature.index()], &config);
                status.readings.freq_hz = freq;
                status.readings.temp_c = temp;
                status.readings.flow_gpm = flow::solve_flow(freq, temp, &config);
                window.clear();

                defmt::debug!("pipeline pass: freq {} Hz, temp {} C", freq, temp);
            }
        }

        console.poll_display(&status);

        if SCHED_FLAGS.take_heartbeat() {
            led.toggle();
        }

        yield_now().await;
    }
}
