// crates/telefeed-media/src/decode.rs
//
// The decode loop shared by the video and audio lanes: pop packets from the
// queue, feed the codec (retaining the packet across EAGAIN), drain every
// available frame through the lane's filtergraph, and hand each one to the
// downstream double buffer.
//
// Frames move by ownership: the freshly decoded frame is swapped out for an
// empty shell and published whole, so nothing is copied on the hot path.

use std::ops::DerefMut;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::util::error::EAGAIN;
use ffmpeg::{decoder, filter, Frame, Packet};
use tracing::{debug, warn};

use crate::dbuffer::FrameDoubleBuffer;
use crate::filters;
use crate::queue::{PacketQueue, PacketRead};

enum Drained {
    /// The codec wants more input.
    NeedsInput,
    /// Fatal decoder error or downstream abort.
    Stop,
}

pub(crate) struct DecodeStage<D, T> {
    pub label:      &'static str,
    pub decoder:    D,
    pub queue:      Arc<PacketQueue>,
    pub in_buf:     Arc<FrameDoubleBuffer<T>>,
    /// `(buffer-source args, graph spec)`; `None` means pass-through.
    pub graph_args: Option<(String, String)>,
    pub audio:      bool,
    pub abort:      Arc<AtomicBool>,
    pub empty:      fn() -> T,
}

impl<D, T> DecodeStage<D, T>
where
    D: DerefMut<Target = decoder::Opened>,
    T: DerefMut<Target = Frame>,
{
    pub fn run(mut self) {
        debug!("{}: starting", self.label);

        let mut graph = self.graph_args.take().and_then(|(args, spec)| {
            match filters::build_graph(self.audio, &args, &spec) {
                Ok(g) => Some(g),
                Err(e) => {
                    warn!("{}: filtergraph unavailable, passing through: {e}", self.label);
                    None
                }
            }
        });

        let mut pending: Option<Packet> = None;
        let mut frame = (self.empty)();

        'stage: while !self.abort.load(Ordering::Relaxed) {
            if pending.is_none() {
                match self.queue.pop() {
                    PacketRead::Packet(p) => pending = Some(p),
                    PacketRead::Eof => {
                        // Flush held frames (B-frame reordering etc.), then end.
                        let _ = self.decoder.send_eof();
                        let _ = self.drain(&mut graph, &mut frame);
                        break;
                    }
                    PacketRead::Aborted => break,
                }
            }

            if let Some(p) = pending.as_ref() {
                match self.decoder.send_packet(p) {
                    Ok(()) => pending = None,
                    // Codec is full: keep the packet and drain first.
                    Err(ffmpeg::Error::Other { errno: EAGAIN }) => {}
                    Err(e) => {
                        warn!("{}: decoder rejected packet: {e}", self.label);
                        break;
                    }
                }
            }

            if let Drained::Stop = self.drain(&mut graph, &mut frame) {
                break 'stage;
            }
        }

        self.in_buf.abort();
        debug!("{}: ending", self.label);
    }

    /// Receive every frame the codec has ready and publish it downstream.
    fn drain(&mut self, graph: &mut Option<filter::Graph>, frame: &mut T) -> Drained {
        loop {
            match self.decoder.receive_frame(frame) {
                Ok(()) => {
                    if let Some(g) = graph.as_mut() {
                        run_filter(g, frame, self.label);
                    }
                    let out = std::mem::replace(frame, (self.empty)());
                    if self.in_buf.publish(out).is_err() {
                        return Drained::Stop;
                    }
                }
                Err(ffmpeg::Error::Other { errno: EAGAIN }) => return Drained::NeedsInput,
                Err(ffmpeg::Error::Eof) => return Drained::Stop,
                Err(e) => {
                    warn!("{}: receive failed: {e}", self.label);
                    return Drained::Stop;
                }
            }
        }
    }
}

/// Push one frame through the graph and pull the filtered result back into
/// the same frame. Filter hiccups are logged and leave the frame unfiltered
/// rather than stalling the lane.
fn run_filter(graph: &mut filter::Graph, frame: &mut Frame, label: &str) {
    if let Some(mut src) = graph.get("in") {
        if let Err(e) = src.source().add(frame) {
            warn!("{label}: filtergraph feed failed: {e}");
            return;
        }
    }
    if let Some(mut sink) = graph.get("out") {
        if let Err(e) = sink.sink().frame(frame) {
            warn!("{label}: filtergraph pull failed: {e}");
        }
    }
}
