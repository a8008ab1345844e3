use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::bus::{StateBus, StateEvent};
use crate::compositor::{Compositor, FrameLayers};
use crate::effect::{EffectBus, FrameContext};
use crate::layer::LayerGroup;
use crate::mask::MaskEngine;
use crate::media::manifest::AnimationLibrary;
use crate::media::surface::Surface;
use crate::midi::types::{ControlEvent, EventKind};
use crate::settings::EngineConfig;
use crate::tempo::{TempoEstimator, TempoUpdate};

/// A note consumer in the routing chain. Returns true when the note was
/// taken; the chain stops at the first taker.
pub trait NoteHandler {
    fn note_on(&mut self, channel: u8, note: u8, velocity: u8) -> bool;
    fn note_off(&mut self, channel: u8, note: u8) -> bool;
}

/// Owns all runtime state and threads config, tempo and the animation
/// library through to every component.
pub struct Engine {
    config: EngineConfig,
    library: Arc<AnimationLibrary>,
    tempo: TempoEstimator,
    deck_a: LayerGroup,
    mask: MaskEngine,
    deck_b: LayerGroup,
    effects_pre: EffectBus,
    overlay: LayerGroup,
    effects_post: EffectBus,
    compositor: Compositor,
    bus: StateBus,
}

impl Engine {
    pub fn new(config: EngineConfig, library: Arc<AnimationLibrary>) -> Self {
        let ch = &config.channels;
        let seed = config.effects.glitch_seed;
        Self {
            tempo: TempoEstimator::new(config.tempo.clone()),
            deck_a: LayerGroup::new("deck A", ch.deck_a.clone(), Arc::clone(&library)),
            mask: MaskEngine::new(ch.mixer, Arc::clone(&library)),
            deck_b: LayerGroup::new("deck B", ch.deck_b.clone(), Arc::clone(&library)),
            effects_pre: EffectBus::new("pre-mix effects", ch.effects_pre, config.effects.clone(), seed),
            overlay: LayerGroup::new("overlay", ch.overlay.clone(), Arc::clone(&library)),
            effects_post: EffectBus::new(
                "post effects",
                ch.effects_post,
                config.effects.clone(),
                seed.wrapping_add(1),
            ),
            compositor: Compositor::new(&config.canvas),
            bus: StateBus::default(),
            library,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn library(&self) -> &Arc<AnimationLibrary> {
        &self.library
    }

    pub fn tempo(&self) -> &TempoEstimator {
        &self.tempo
    }

    pub fn deck_a(&self) -> &LayerGroup {
        &self.deck_a
    }

    pub fn deck_b(&self) -> &LayerGroup {
        &self.deck_b
    }

    pub fn overlay(&self) -> &LayerGroup {
        &self.overlay
    }

    pub fn mask(&self) -> &MaskEngine {
        &self.mask
    }

    pub fn effects_pre(&self) -> &EffectBus {
        &self.effects_pre
    }

    pub fn effects_post(&self) -> &EffectBus {
        &self.effects_post
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    pub fn subscribe(&mut self) -> Receiver<StateEvent> {
        self.bus.subscribe()
    }

    /// Forward an input connection transition to listeners.
    pub fn set_connected(&mut self, connected: bool) {
        self.bus.publish(StateEvent::Connection(connected));
    }

    pub fn set_manual_bpm(&mut self, bpm: f64) {
        let update = self.tempo.set_manual(bpm);
        self.publish_tempo(update);
    }

    fn publish_tempo(&mut self, update: Option<TempoUpdate>) {
        if let Some(update) = update {
            self.bus.publish(StateEvent::Tempo(update));
        }
    }

    pub fn handle_event(&mut self, event: &ControlEvent) {
        match event.kind {
            EventKind::ClockPulse => {
                let update = self.tempo.on_pulse(event.timestamp);
                self.publish_tempo(update);
                self.deck_a.on_pulse();
                self.deck_b.on_pulse();
                self.overlay.on_pulse();
                self.mask.on_pulse();
                // Pulses are too frequent to fan out.
                return;
            }
            EventKind::Start => self.tempo.on_start(),
            EventKind::Stop => self.tempo.on_stop(),
            EventKind::Continue => self.tempo.on_continue(),
            EventKind::ControlChange => {
                let bound = self
                    .config
                    .tempo
                    .controller
                    .is_some_and(|b| b.matches(event.channel, event.data1));
                if bound {
                    let update = self.tempo.on_controller(event.data2);
                    self.publish_tempo(update);
                }
            }
            EventKind::NoteOn => {
                self.route_note(event.channel, event.data1, Some(event.data2));
            }
            EventKind::NoteOff => {
                self.route_note(event.channel, event.data1, None);
            }
        }
        self.bus.publish(StateEvent::Control(*event));
    }

    /// Offer a note to each handler in order until one takes it. Reserved
    /// channels never reach a handler.
    fn route_note(&mut self, channel: u8, note: u8, velocity: Option<u8>) -> bool {
        if self.config.channels.is_reserved(channel) {
            return false;
        }
        let handlers: [&mut dyn NoteHandler; 6] = [
            &mut self.deck_a,
            &mut self.mask,
            &mut self.deck_b,
            &mut self.effects_pre,
            &mut self.overlay,
            &mut self.effects_post,
        ];
        handlers.into_iter().any(|handler| match velocity {
            Some(velocity) => handler.note_on(channel, note, velocity),
            None => handler.note_off(channel, note),
        })
    }

    /// Advance everything to `now_ms` and composite one frame into `surface`.
    pub fn render(&mut self, now_ms: f64, surface: &mut dyn Surface) {
        let update = self.tempo.check_timeout(now_ms);
        self.publish_tempo(update);
        let bpm = self.tempo.bpm();

        self.deck_a.advance(now_ms, bpm);
        self.deck_b.advance(now_ms, bpm);
        self.overlay.advance(now_ms, bpm);
        self.mask.advance(now_ms, bpm);

        let layers = FrameLayers {
            deck_a: &mut self.deck_a,
            deck_b: &mut self.deck_b,
            overlay: &mut self.overlay,
            mask: &self.mask,
            effects_pre: &mut self.effects_pre,
            effects_post: &mut self.effects_post,
        };
        self.compositor
            .render(layers, surface, FrameContext { now_ms, bpm });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::test_support::{rate_def, solid_def};
    use crate::effect::EffectKind;
    use crate::media::surface::PixelBuffer;
    use crate::tempo::TempoSource;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    fn engine() -> Engine {
        let mut lib = AnimationLibrary::new();
        lib.insert(0, 60, 40, Arc::new(solid_def(RED)));
        lib.insert(0, 61, 0, Arc::new(rate_def(4, 10.0)));
        lib.insert(5, 60, 0, Arc::new(solid_def(BLUE)));
        lib.insert(4, 36, 0, Arc::new(solid_def([255, 255, 255, 255])));
        lib.insert(4, 37, 0, Arc::new(solid_def([0, 0, 0, 255])));
        lib.insert(15, 60, 0, Arc::new(solid_def(RED)));
        let mut config = EngineConfig::default();
        config.canvas.width = 4;
        config.canvas.height = 4;
        Engine::new(config, Arc::new(lib))
    }

    fn note_on(e: &mut Engine, ch: u8, note: u8, vel: u8) {
        e.handle_event(&ControlEvent::note_on(ch, note, vel, 0.0));
    }

    fn note_off(e: &mut Engine, ch: u8, note: u8) {
        e.handle_event(&ControlEvent::note_off(ch, note, 0.0));
    }

    #[test]
    fn notes_route_by_channel() {
        let mut e = engine();
        note_on(&mut e, 0, 60, 100);
        note_on(&mut e, 5, 60, 100);
        assert_eq!(e.deck_a().active_count(), 1);
        assert_eq!(e.deck_b().active_count(), 1);
        assert!(e.overlay().is_empty());
    }

    #[test]
    fn reserved_channel_is_ignored() {
        let mut e = engine();
        note_on(&mut e, 15, 60, 100);
        assert!(e.deck_a().is_empty());
        assert!(e.deck_b().is_empty());
        assert!(e.overlay().is_empty());
    }

    #[test]
    fn low_velocity_does_not_activate() {
        let mut e = engine();
        note_on(&mut e, 0, 60, 30);
        assert!(e.deck_a().is_empty());
        note_on(&mut e, 0, 60, 40);
        assert_eq!(e.deck_a().active_count(), 1);
    }

    #[test]
    fn mask_latches_through_note_off() {
        let mut e = engine();
        note_on(&mut e, 0, 60, 100);
        note_on(&mut e, 5, 60, 100);
        note_on(&mut e, 4, 36, 100);
        note_off(&mut e, 4, 36);

        let mut out = PixelBuffer::new(4, 4);
        e.render(0.0, &mut out);
        assert_eq!(e.mask().latched().unwrap().note, 36);
        assert_eq!(out.pixel(0, 0), BLUE);

        note_on(&mut e, 4, 37, 100);
        e.render(16.0, &mut out);
        assert_eq!(e.mask().latched().unwrap().note, 37);
        assert_eq!(out.pixel(0, 0), RED);
    }

    #[test]
    fn effects_release_only_matching_note() {
        let mut e = engine();
        note_on(&mut e, 9, 50, 100);
        assert!(e.effects_pre().slot(EffectKind::Color).is_some());
        note_off(&mut e, 9, 50);
        assert!(e.effects_pre().slot(EffectKind::Color).is_none());

        note_on(&mut e, 9, 55, 100);
        note_off(&mut e, 9, 50);
        assert_eq!(e.effects_pre().slot(EffectKind::Color).unwrap().note, 55);
        assert!(e.effects_post().is_empty());
    }

    #[test]
    fn clock_pulses_set_tempo_and_notify() {
        let mut config = EngineConfig::default();
        config.tempo.ppqn = 48;
        let mut e = Engine::new(config, Arc::new(AnimationLibrary::new()));
        let rx = e.subscribe();
        for i in 0..7u32 {
            e.handle_event(&ControlEvent::realtime(
                EventKind::ClockPulse,
                f64::from(i) * 10.0,
            ));
        }
        assert!((e.tempo().bpm() - 125.0).abs() < 0.5);
        assert_eq!(e.tempo().source(), TempoSource::Clock);
        let tempo_events: Vec<StateEvent> = rx
            .try_iter()
            .filter(|ev| matches!(ev, StateEvent::Tempo(_)))
            .collect();
        assert_eq!(tempo_events.len(), 1);
    }

    #[test]
    fn clock_silence_falls_back_on_render() {
        let mut e = engine();
        for i in 0..7u32 {
            e.handle_event(&ControlEvent::realtime(
                EventKind::ClockPulse,
                f64::from(i) * 20.0,
            ));
        }
        assert_eq!(e.tempo().source(), TempoSource::Clock);
        let mut out = PixelBuffer::new(4, 4);
        e.render(5000.0, &mut out);
        assert_eq!(e.tempo().source(), TempoSource::Default);
        assert_eq!(e.tempo().bpm(), 120.0);
    }

    #[test]
    fn bound_controller_sets_tempo() {
        let mut e = engine();
        e.handle_event(&ControlEvent::control_change(3, 20, 127, 0.0));
        assert_eq!(e.tempo().source(), TempoSource::Controller);
        assert_eq!(e.tempo().bpm(), 300.0);
        e.handle_event(&ControlEvent::control_change(3, 21, 0, 0.0));
        assert_eq!(e.tempo().bpm(), 300.0);
    }

    #[test]
    fn manual_tempo_is_published() {
        let mut e = engine();
        let rx = e.subscribe();
        e.set_manual_bpm(90.0);
        e.set_manual_bpm(90.0);
        assert_eq!(e.tempo().bpm(), 90.0);
        let events: Vec<StateEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            StateEvent::Tempo(TempoUpdate {
                source: TempoSource::Manual,
                ..
            })
        ));
    }

    #[test]
    fn control_events_fan_out() {
        let mut e = engine();
        let rx = e.subscribe();
        note_on(&mut e, 0, 60, 100);
        e.set_connected(true);
        let events: Vec<StateEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                StateEvent::Control(ControlEvent::note_on(0, 60, 100, 0.0)),
                StateEvent::Connection(true),
            ]
        );
    }

    #[test]
    fn render_advances_animations() {
        let mut e = engine();
        note_on(&mut e, 0, 61, 100);
        let mut out = PixelBuffer::new(4, 4);
        e.render(0.0, &mut out);
        e.render(250.0, &mut out);
        assert_eq!(e.deck_a().instance(0, 61).unwrap().current_frame(), 2);
        assert_eq!(out.pixel(0, 0), [30, 30, 30, 255]);
    }

    #[test]
    fn retrigger_round_trip_through_engine() {
        let mut e = engine();
        let mut out = PixelBuffer::new(4, 4);
        note_on(&mut e, 0, 61, 100);
        e.render(0.0, &mut out);
        e.render(350.0, &mut out);
        note_off(&mut e, 0, 61);
        assert!(e.deck_a().instance(0, 61).is_none());
        note_on(&mut e, 0, 61, 100);
        e.render(400.0, &mut out);
        assert_eq!(e.deck_a().instance(0, 61).unwrap().current_frame(), 0);
    }
}
