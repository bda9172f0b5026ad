//! tripreel turns a list of named stops into an animated trip map.
//!
//! Stops are geocoded, each leg is routed for its transport mode (flights are drawn as
//! direct segments), and a marker travels the legs one after another. Playback can be
//! recorded to a streamable video through `ffmpeg`.
//!
//! The pieces, bottom-up:
//!
//! - [`Trip`] holds the start, waypoints and end, and derives leg requests from them
//! - [`GeocodingGateway`] and [`RouteResolver`] talk to the lookup and routing services;
//!   every route batch carries a generation so superseded batches are never drawn
//! - [`AnimationEngine`] steps a `Stopped`/`Playing`/`Paused` machine from an injected clock
//! - [`MapSession`] projects routes, stops, the marker and basemap tiles; [`SvgBackend`]
//!   rasterizes it
//! - [`CapturePipeline`] samples frames while the animation plays and feeds a [`FrameSink`]
//! - [`TripPlayer`] coordinates all of it, either through direct async calls or from a
//!   [`PlayerCommand`] channel with [`TripPlayer::run`]
//!
//! User-facing messages go out on a single [`Notifier`] channel.
#![forbid(unsafe_code)]

pub mod animation;
pub mod capture;
pub mod clock;
pub mod config;
pub mod encode;
pub mod foundation;
pub mod geocode;
pub mod map;
pub mod model;
pub mod notice;
pub mod player;
pub mod project;
pub mod render;
pub mod route;
pub mod tiles;

pub use animation::{
    ease::Ease,
    engine::{AnimationEngine, AnimationEvent, LegPlan, PlayState, StopReason},
    timing::{LegTiming, ResumePolicy},
};
pub use capture::{CapturePipeline, CaptureTick, Recording};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use encode::{
    ffmpeg::{FfmpegSink, FfmpegSinkOpts},
    sink::{EncodedChunk, FrameSink, InMemorySink, SinkConfig, VideoCodec},
};
pub use foundation::core::{Canvas, Coordinate, Fps};
pub use foundation::error::{TripError, TripResult};
pub use foundation::geo::Polyline;
pub use geocode::{GeocodeError, Geocoder, GeocodingGateway, NominatimGeocoder, Place};
pub use map::{MapSession, Viewport};
pub use model::{LegRequest, LocationId, LocationPoint, TransportMode, Trip};
pub use notice::{Notice, NoticeLevel, Notifier};
pub use player::{PlayerCommand, PlayerEvent, PlayerOptions, PlayerServices, TripPlayer};
pub use project::{FileStore, KeyValueStore, MemoryStore, Project, ProjectStore};
pub use render::{
    backend::{FrameRGBA, RenderBackend},
    svg::SvgBackend,
};
pub use route::{
    OsrmRouter, ResolvedLeg, RouteBatch, RouteError, RouteResolver, RouteSource, RoutingService,
};
pub use tiles::{HttpTileSource, TileLayer, TileSource};
