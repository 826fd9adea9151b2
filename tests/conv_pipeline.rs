use convpipe::arch::conv::{
  BuiltinWeights, ConfigError, ConvLayer, FeatureMap, LayerId, OutputPos, ProtocolError, WeightStore, WeightTable, Q6,
};
use convpipe::builtin::Wire;
use convpipe::simulator::harness::{run_raster, CycleHarness, DownstreamSink, ReadyPolicy, RunReport, UpstreamSource};
use convpipe::simulator::SimError;

const MAX_CYCLES: u64 = 200_000;

/// Straight-line fixed-point reference for one output position.
fn golden(table: &WeightTable, map: &FeatureMap, pos: OutputPos) -> Vec<(i8, i8)> {
  let g = table.layer.geometry();
  (0..g.filters)
    .map(|f| {
      let mut sum: i32 = 0;
      for tap in 0..9 {
        for ch in 0..g.in_channels {
          let word = table.words[tap * g.in_channels + ch];
          let w = ((word >> ((g.filters - 1 - f) * 8)) & 0xFF) as u8 as i8 as i32;
          let (r, c) = (pos.row + tap / 3, pos.col + tap % 3);
          let x = map.values[(r * map.size + c) * map.channels + ch].0 as i32;
          sum += (w * x) << 6;
        }
      }
      let sum = sum.clamp(-32768, 32767);
      let biased = (sum + ((table.biases[f].0 as i32) << 6)).clamp(-32768, 32767);
      let rounded = if biased >= 0 {
        (biased + 32) >> 6
      } else {
        -((-biased + 32) >> 6)
      };
      let pre = rounded.clamp(-128, 127) as i8;
      (pre, pre.max(0))
    })
    .collect()
}

fn check_against_golden(report: &RunReport, table: &WeightTable, map: &FeatureMap) {
  let out_size = table.layer.geometry().out_size();
  assert_eq!(report.outputs.len(), out_size * out_size);
  for (i, out) in report.outputs.iter().enumerate() {
    assert_eq!(out.pos, OutputPos::new(i / out_size, i % out_size));
    let expected = golden(table, map, out.pos);
    let got: Vec<(i8, i8)> = out
      .pre_activation
      .iter()
      .zip(&out.activations)
      .map(|(p, a)| (p.0, a.0))
      .collect();
    assert_eq!(got, expected, "position {:?}", out.pos);
  }
}

/// Deterministic pseudo-random bytes in [-range, range].
fn noise(seed: u64, len: usize, range: i32) -> Vec<Q6> {
  let mut state = seed;
  (0..len)
    .map(|_| {
      state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
      let v = ((state >> 33) % (2 * range as u64 + 1)) as i32 - range;
      Q6(v as i8)
    })
    .collect()
}

#[test]
fn test_conv1_builtin_full_raster() {
  let table = BuiltinWeights.table(LayerId::Conv1).unwrap();
  let map = FeatureMap::ramp(28, 1, 2);
  let layer = ConvLayer::new("conv1", table.clone()).unwrap();
  let report = run_raster(layer, map.clone(), 1, ReadyPolicy::Always, MAX_CYCLES).unwrap();
  check_against_golden(&report, &table, &map);

  let first = &report.outputs[0];
  assert_eq!(first.pre_activation[1], Q6(92));
  assert_eq!(first.activations[0], Q6::ZERO);

  let stats = report.stats.unwrap();
  assert_eq!(stats.accumulates, 676 * 9);
  assert_eq!(stats.clears, 676);
  assert_eq!(stats.accepted, 676);
  assert_eq!(stats.outputs, 676);
  assert_eq!(stats.raster_completions, 1);
}

#[test]
fn test_conv2_multichannel_raster() {
  let kernels: Vec<Vec<Q6>> = (0..16).map(|f| noise(f as u64 + 1, 72, 6)).collect();
  let biases = noise(99, 16, 40);
  let table = WeightTable::from_kernels(LayerId::Conv2, &kernels, biases);
  let map = FeatureMap::new(13, 8, noise(7, 13 * 13 * 8, 5)).unwrap();

  let layer = ConvLayer::new("conv2", table.clone()).unwrap();
  let report = run_raster(layer, map.clone(), 2, ReadyPolicy::Always, 1_000_000).unwrap();
  check_against_golden(&report, &table, &map);

  let stats = report.stats.unwrap();
  assert_eq!(stats.accumulates, 121 * 72);
  assert_eq!(stats.outputs, 121);
}

#[test]
fn test_reference_position_is_73() {
  let kernel: Vec<Q6> = [3, 14, -8, 7, 10, -15, -4, 1, 14].iter().map(|&w| Q6(w)).collect();
  let mut biases = vec![Q6::ZERO; 8];
  biases[0] = Q6(-2);
  let table = WeightTable::from_kernels(LayerId::Conv1, &[kernel], biases);

  // ramp base 2: the top-left patch is [2 3 4; 3 4 5; 4 5 6]
  let map = FeatureMap::ramp(28, 1, 2);
  let layer = ConvLayer::new("conv1", table).unwrap();
  let sink = DownstreamSink::new([OutputPos::new(0, 0)], ReadyPolicy::Always);
  let mut harness = CycleHarness::new(layer, UpstreamSource::new(map, 1), sink);
  let report = harness.run(10_000).unwrap();

  let out = &report.outputs[0];
  assert_eq!(out.pre_activation[0], Q6(73));
  assert_eq!(out.activations[0], Q6(73));
  assert_eq!(report.stats.unwrap().accumulates, 9);
}

#[test]
fn test_zero_weights_give_bias_only() {
  let biases = vec![Q6(-3), Q6(0), Q6(5), Q6(127), Q6(-128), Q6(1), Q6(-1), Q6(64)];
  let table = WeightTable::zeros(LayerId::Conv1, biases.clone());
  let layer = ConvLayer::new("conv1", table).unwrap();
  let map = FeatureMap::ramp(28, 1, 40);
  let report = run_raster(layer, map, 0, ReadyPolicy::Always, MAX_CYCLES).unwrap();

  for out in &report.outputs {
    assert_eq!(out.pre_activation, biases);
    let relu: Vec<Q6> = biases.iter().map(|b| Q6(b.0.max(0))).collect();
    assert_eq!(out.activations, relu);
  }
  let stats = report.stats.unwrap();
  assert_eq!(stats.acc_saturations, 0);
  assert_eq!(stats.rescale_saturations, 0);
}

#[test]
fn test_identity_kernel_round_trip() {
  // raw weight 1 at the centre tap: (x * 1) << 6 rescales back to x
  let mut centre = vec![Q6::ZERO; 9];
  centre[4] = Q6(1);
  let table = WeightTable::from_kernels(LayerId::Conv1, &[centre], vec![Q6::ZERO; 8]);
  let values: Vec<Q6> = (0..28 * 28).map(|i| Q6(((i % 256) as i32 - 128) as i8)).collect();
  let map = FeatureMap::new(28, 1, values).unwrap();

  let layer = ConvLayer::new("conv1", table).unwrap();
  let report = run_raster(layer, map.clone(), 1, ReadyPolicy::Always, MAX_CYCLES).unwrap();
  for out in &report.outputs {
    let centre = map.values[(out.pos.row + 1) * 28 + out.pos.col + 1];
    assert_eq!(out.pre_activation[0], centre);
    assert_eq!(out.activations[0], Q6(centre.0.max(0)));
  }
}

#[test]
fn test_partial_sum_overflow_does_not_depend_on_tap_order() {
  // same weights, different tap order: each product leaves Q2.12 but both sums are 0
  let k0: Vec<Q6> = [6, 6, 6, -6, -6, -6, 0, 0, 0].iter().map(|&w| Q6(w)).collect();
  let k1: Vec<Q6> = [6, -6, 6, -6, 6, -6, 0, 0, 0].iter().map(|&w| Q6(w)).collect();
  let table = WeightTable::from_kernels(LayerId::Conv1, &[k0, k1], vec![Q6::ZERO; 8]);
  let map = FeatureMap::new(28, 1, vec![Q6(100); 28 * 28]).unwrap();

  let layer = ConvLayer::new("conv1", table.clone()).unwrap();
  let sink = DownstreamSink::new([OutputPos::new(0, 0), OutputPos::new(12, 9)], ReadyPolicy::Always);
  let mut harness = CycleHarness::new(layer, UpstreamSource::new(map.clone(), 1), sink);
  let report = harness.run(10_000).unwrap();

  for out in &report.outputs {
    let expected: Vec<Q6> = golden(&table, &map, out.pos).iter().map(|&(p, _)| Q6(p)).collect();
    assert_eq!(out.pre_activation, expected);
    assert_eq!(out.pre_activation, vec![Q6::ZERO; 8]);
  }
  let stats = report.stats.unwrap();
  assert_eq!(stats.acc_saturations, 0);
  assert_eq!(stats.rescale_saturations, 0);
}

#[test]
fn test_saturation_clamps_instead_of_wrapping() {
  let positive = vec![Q6(127); 9];
  let negative = vec![Q6(-128); 9];
  let table = WeightTable::from_kernels(LayerId::Conv1, &[positive, negative], vec![Q6::ZERO; 8]);
  let layer = ConvLayer::new("conv1", table).unwrap();
  let map = FeatureMap::ramp(28, 1, 100);
  let sink = DownstreamSink::new([OutputPos::new(3, 4)], ReadyPolicy::Always);
  let mut harness = CycleHarness::new(layer, UpstreamSource::new(map, 1), sink);
  let report = harness.run(10_000).unwrap();

  let out = &report.outputs[0];
  assert_eq!(out.pre_activation[0], Q6::MAX);
  assert_eq!(out.pre_activation[1], Q6::MIN);
  assert_eq!(out.activations[1], Q6::ZERO);
  let stats = report.stats.unwrap();
  assert!(stats.acc_saturations > 0);
  assert!(stats.rescale_saturations >= 2);
}

#[test]
fn test_second_raster_after_completion() {
  let table = BuiltinWeights.table(LayerId::Conv1).unwrap();
  let map = FeatureMap::ramp(28, 1, 2);
  let layer = ConvLayer::new("conv1", table).unwrap();
  let first = run_raster(layer.clone(), map.clone(), 1, ReadyPolicy::Always, MAX_CYCLES).unwrap();

  let sink = DownstreamSink::raster(26, ReadyPolicy::Always);
  let mut harness = CycleHarness::new(layer, UpstreamSource::new(map, 1), sink);
  harness.run(MAX_CYCLES).unwrap();
  let sink = DownstreamSink::raster(26, ReadyPolicy::Always);
  let source = harness.source.clone();
  let mut again = CycleHarness::new(harness.layer, source, sink);
  let second = again.run(MAX_CYCLES).unwrap();

  assert_eq!(second.outputs, first.outputs);
  assert_eq!(second.stats.unwrap().raster_completions, 2);
}

#[test]
fn test_backpressure_stalls_without_loss() {
  let table = BuiltinWeights.table(LayerId::Conv1).unwrap();
  let map = FeatureMap::ramp(28, 1, 3);
  let layer = ConvLayer::new("conv1", table).unwrap();

  let free = run_raster(layer.clone(), map.clone(), 1, ReadyPolicy::Always, MAX_CYCLES).unwrap();
  let slow = run_raster(layer, map, 1, ReadyPolicy::Periodic { period: 17 }, MAX_CYCLES).unwrap();

  assert_eq!(slow.outputs, free.outputs);
  assert!(slow.cycles > free.cycles);
  assert_eq!(free.stats.unwrap().downstream_stall_cycles, 0);
  assert!(slow.stats.unwrap().downstream_stall_cycles > 0);
}

#[test]
fn test_upstream_latency_only_costs_cycles() {
  let table = BuiltinWeights.table(LayerId::Conv1).unwrap();
  let map = FeatureMap::ramp(28, 1, 1);
  let layer = ConvLayer::new("conv1", table).unwrap();

  let fast = run_raster(layer.clone(), map.clone(), 0, ReadyPolicy::Always, MAX_CYCLES).unwrap();
  let slow = run_raster(layer, map, 6, ReadyPolicy::Always, MAX_CYCLES).unwrap();

  assert_eq!(slow.outputs, fast.outputs);
  assert!(slow.cycles > fast.cycles);
  assert!(slow.stats.unwrap().upstream_stall_cycles > fast.stats.unwrap().upstream_stall_cycles);
}

#[test]
fn test_one_output_per_request_in_order() {
  let table = BuiltinWeights.table(LayerId::Conv1).unwrap();
  let map = FeatureMap::ramp(28, 1, 2);
  let layer = ConvLayer::new("conv1", table).unwrap();
  let order = [OutputPos::new(25, 25), OutputPos::new(0, 7), OutputPos::new(0, 7), OutputPos::new(13, 2)];
  let sink = DownstreamSink::new(order, ReadyPolicy::Always);
  let mut harness = CycleHarness::new(layer, UpstreamSource::new(map, 2), sink);
  let report = harness.run(10_000).unwrap();

  let got: Vec<OutputPos> = report.outputs.iter().map(|o| o.pos).collect();
  assert_eq!(got, order.to_vec());
  assert_eq!(report.outputs[1], report.outputs[2]);
  let stats = report.stats.unwrap();
  assert_eq!(stats.accumulates, 4 * 9);
  assert_eq!(stats.raster_completions, 0);
}

#[test]
fn test_out_of_range_request_is_reported() {
  let layer = ConvLayer::from_store("conv1", LayerId::Conv1, &BuiltinWeights).unwrap();
  let sink = DownstreamSink::new([OutputPos::new(26, 0)], ReadyPolicy::Always);
  let mut harness = CycleHarness::new(layer, UpstreamSource::new(FeatureMap::ramp(28, 1, 0), 1), sink);
  match harness.run(100) {
    Err(SimError::Protocol {
      cycle: 0,
      source: ProtocolError::PositionOutOfRange { out_size: 26, .. },
    }) => {},
    other => panic!("unexpected {:?}", other.map(|r| r.cycles)),
  }
}

#[test]
fn test_unsolicited_and_withdrawn_handshakes() {
  let mut layer = ConvLayer::from_store("conv1", LayerId::Conv1, &BuiltinWeights).unwrap();
  layer.down_req.set(OutputPos::new(0, 0));
  layer.tick().unwrap();
  layer.down_req.clear();
  layer.tick().unwrap();
  // data-valid with nothing requested yet
  layer.up_resp.set(Q6(1));
  assert_eq!(layer.tick(), Err(ProtocolError::UnsolicitedSample));

  let mut layer = ConvLayer::from_store("conv1", LayerId::Conv1, &BuiltinWeights).unwrap();
  layer.down_req.set(OutputPos::new(0, 0));
  layer.tick().unwrap();
  layer.down_req.set(OutputPos::new(0, 1));
  layer.tick().unwrap();
  layer.down_req = Wire::default();
  assert_eq!(
    layer.tick(),
    Err(ProtocolError::RequestWithdrawn {
      pos: OutputPos::new(0, 1)
    })
  );
}

#[test]
fn test_timeout_is_bounded() {
  let layer = ConvLayer::from_store("conv1", LayerId::Conv1, &BuiltinWeights).unwrap();
  let result = run_raster(layer, FeatureMap::ramp(28, 1, 0), 1, ReadyPolicy::Always, 50);
  assert!(matches!(
    result,
    Err(SimError::Timeout {
      cycles: 50,
      expected: 676,
      ..
    })
  ));
}

#[test]
fn test_misconfigured_layers_refuse_to_build() {
  let table = WeightTable::zeros(LayerId::Conv2, vec![Q6::ZERO; 8]);
  assert_eq!(
    ConvLayer::new("conv2", table).unwrap_err(),
    ConfigError::FilterBiasMismatch {
      layer: LayerId::Conv2,
      filters: 16,
      biases: 8
    }
  );
  assert_eq!(
    ConvLayer::from_store("conv2", LayerId::Conv2, &BuiltinWeights).unwrap_err(),
    ConfigError::MissingTable(LayerId::Conv2)
  );

  let layer = ConvLayer::from_store("conv1", LayerId::Conv1, &BuiltinWeights).unwrap();
  let result = run_raster(layer, FeatureMap::ramp(13, 8, 0), 1, ReadyPolicy::Always, 100);
  assert!(matches!(result, Err(SimError::Config(ConfigError::InputShape { .. }))));
}
