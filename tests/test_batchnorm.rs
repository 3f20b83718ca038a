// Integration tests for batch normalization.
// Tests the normalizer in isolation and wired into a convolutional layer,
// where it runs between the convolution and the bias.

use approx::assert_abs_diff_eq;
use rust_convnet::layers::batchnorm::{BatchNorm, EPSILON, ROLLING_MOMENTUM};
use rust_convnet::layers::conv2d::{ConvConfig, ConvolutionalLayer};
use rust_convnet::layers::{Layer, Mode, PassState};
use rust_convnet::optimizers::MomentumSgd;
use rust_convnet::utils::{Activation, SimpleRng};
use rust_convnet::Workspace;

// Pointwise single-filter layer whose convolution is the identity.
fn identity_layer(height: usize, width: usize, batch: usize) -> (ConvolutionalLayer, Workspace) {
    let config = ConvConfig {
        batch,
        activation: Activation::Linear,
        batch_normalize: true,
        ..ConvConfig::new(height, width, 1, 1, 1)
    };
    let mut rng = SimpleRng::new(17);
    let mut layer = ConvolutionalLayer::new(config, &mut rng).unwrap();
    layer.weights_mut()[0] = 1.0;
    let workspace = Workspace::new(layer.workspace_size());
    (layer, workspace)
}

fn channel_stats(data: &[f32], channels: usize, spatial: usize) -> Vec<(f32, f32)> {
    (0..channels)
        .map(|c| {
            let values: Vec<f32> = data
                .iter()
                .enumerate()
                .filter(|(i, _)| (i / spatial) % channels == c)
                .map(|(_, &v)| v)
                .collect();
            let n = values.len() as f32;
            let mean = values.iter().sum::<f32>() / n;
            let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
            (mean, var)
        })
        .collect()
}

// ============================================================================
// Standalone normalizer
// ============================================================================

#[test]
fn test_batchnorm_initialization() {
    let bn = BatchNorm::new(4, 9, 2);

    assert_eq!(bn.channels(), 4);
    assert!(bn.scales().iter().all(|&s| s == 1.0));
    assert!(bn.scale_grad().iter().all(|&g| g == 0.0));
    assert!(bn.rolling_mean().iter().all(|&m| m == 0.0));
    assert!(bn.rolling_variance().iter().all(|&v| v == 0.0));
}

#[test]
fn test_batchnorm_statistics_span_batch_and_space() {
    // 2 samples x 2 channels x 2 positions
    let mut bn = BatchNorm::new(2, 2, 2);
    let mut data = vec![
        1.0, 3.0, 10.0, 10.0, // sample 0: channel 0, channel 1
        5.0, 7.0, 20.0, 20.0, // sample 1: channel 0, channel 1
    ];

    bn.forward(&mut data, Mode::Train);

    assert_abs_diff_eq!(bn.mean()[0], 4.0, epsilon = 1e-6);
    assert_abs_diff_eq!(bn.mean()[1], 15.0, epsilon = 1e-6);
    // biased variance: divided by the count, not count - 1
    assert_abs_diff_eq!(bn.variance()[0], 5.0, epsilon = 1e-5);
    assert_abs_diff_eq!(bn.variance()[1], 25.0, epsilon = 1e-4);

    for (mean, var) in channel_stats(&data, 2, 2) {
        assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-5);
        assert_abs_diff_eq!(var, 1.0, epsilon = 1e-3);
    }
}

#[test]
fn test_batchnorm_epsilon_prevents_division_by_zero() {
    let mut bn = BatchNorm::new(1, 4, 1);
    let mut data = vec![3.0; 4];

    bn.forward(&mut data, Mode::Train);

    assert_eq!(bn.variance()[0], 0.0);
    assert!(data.iter().all(|v| v.is_finite() && *v == 0.0));
}

#[test]
fn test_batchnorm_large_and_small_values() {
    for scale in [1e-3f32, 1e4] {
        let mut bn = BatchNorm::new(1, 4, 1);
        let mut data: Vec<f32> = [1.0, 2.0, 3.0, 4.0].iter().map(|v| v * scale).collect();

        bn.forward(&mut data, Mode::Train);

        assert!(data.iter().all(|v| v.is_finite()));
        let (mean, _) = channel_stats(&data, 1, 4)[0];
        assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-4);
    }
}

#[test]
fn test_batchnorm_convergence_of_running_statistics() {
    let mut bn = BatchNorm::new(1, 4, 1);
    let input = [2.0, 4.0, 6.0, 8.0];
    let passes = 50;

    for _ in 0..passes {
        let mut data = input.to_vec();
        bn.forward(&mut data, Mode::Train);
    }

    // r_n = (1 - momentum^n) · m for a fixed batch
    let reached = 1.0 - ROLLING_MOMENTUM.powi(passes);
    assert_abs_diff_eq!(bn.rolling_mean()[0], reached * 5.0, epsilon = 1e-4);
    assert_abs_diff_eq!(bn.rolling_variance()[0], reached * 5.0, epsilon = 1e-4);
}

#[test]
fn test_batchnorm_scale_update_clears_gradient() {
    let mut bn = BatchNorm::new(1, 2, 1);
    let mut data = vec![-1.0, 1.0];
    bn.forward(&mut data, Mode::Train);
    let mut delta = vec![-1.0, 1.0];
    bn.backward(&mut delta);
    let grad = bn.scale_grad()[0];
    assert!(grad > 1.9);

    let rate = rust_convnet::optimizers::GroupRate::default();
    bn.update(&MomentumSgd::new(0.1, 0.0, 0.0), rate, 1);

    assert_abs_diff_eq!(bn.scales()[0], 1.0 + 0.1 * grad, epsilon = 1e-6);
    assert_eq!(bn.scale_grad(), &[0.0]);
}

// ============================================================================
// Inside a convolutional layer
// ============================================================================

#[test]
fn test_conv_batchnorm_bias_added_after_normalization() {
    let (mut layer, mut workspace) = identity_layer(2, 2, 1);
    layer.biases_mut()[0] = 3.0;

    let mut state = PassState::new(&mut workspace, Mode::Train);
    layer.forward(&[1.0, 2.0, 3.0, 4.0], &mut state);

    let (mean, var) = channel_stats(layer.output(), 1, 4)[0];
    assert_abs_diff_eq!(mean, 3.0, epsilon = 1e-5);
    assert_abs_diff_eq!(var, 1.0, epsilon = 1e-3);
}

#[test]
fn test_conv_batchnorm_inference_uses_rolling_statistics() {
    let (mut layer, mut workspace) = identity_layer(1, 2, 1);
    layer.biases_mut()[0] = 0.5;
    {
        let bn = layer.batch_norm_mut().unwrap();
        bn.scales_mut()[0] = 2.0;
        bn.rolling_mean_mut()[0] = 1.0;
        bn.rolling_variance_mut()[0] = 4.0;
    }

    let mut state = PassState::new(&mut workspace, Mode::Inference);
    layer.forward(&[3.0, -1.0], &mut state);

    let std = (4.0 + EPSILON).sqrt();
    assert_abs_diff_eq!(layer.output()[0], 2.0 * 2.0 / std + 0.5, epsilon = 1e-6);
    assert_abs_diff_eq!(layer.output()[1], -2.0 * 2.0 / std + 0.5, epsilon = 1e-6);
}

#[test]
fn test_conv_batchnorm_mode_switching() {
    let (mut layer, mut workspace) = identity_layer(2, 2, 2);
    let input: Vec<f32> = (0..8).map(|v| v as f32).collect();

    {
        let mut state = PassState::new(&mut workspace, Mode::Train);
        layer.forward(&input, &mut state);
    }
    let train_output = layer.output().to_vec();
    let rolling = layer.batch_norm().unwrap().rolling_mean().to_vec();
    assert!(layer.batch_norm().unwrap().cache_valid());

    {
        let mut state = PassState::new(&mut workspace, Mode::Inference);
        layer.forward(&input, &mut state);
    }
    // rolling statistics lag the batch statistics, so the outputs differ
    assert_ne!(layer.output(), train_output.as_slice());
    assert_eq!(layer.batch_norm().unwrap().rolling_mean(), rolling.as_slice());
    assert!(!layer.batch_norm().unwrap().cache_valid());
}

#[test]
fn test_conv_batchnorm_uniform_delta_has_no_input_gradient() {
    let (mut layer, mut workspace) = identity_layer(2, 2, 1);
    let input = [1.0, 4.0, 2.0, 8.0];
    let mut upstream = vec![0.0; 4];

    let mut state = PassState::new(&mut workspace, Mode::Train);
    layer.forward(&input, &mut state);
    layer.delta_mut().fill(1.0);
    layer.backward(&input, Some(&mut upstream), &mut state);

    // shifting every input equally leaves the normalized output unchanged
    for g in upstream {
        assert_abs_diff_eq!(g, 0.0, epsilon = 1e-4);
    }
    assert_abs_diff_eq!(layer.bias_grad()[0], 4.0, epsilon = 1e-6);
}

#[test]
#[should_panic(expected = "batch norm backward called in inference mode")]
fn test_conv_batchnorm_backward_in_inference_panics() {
    let (mut layer, mut workspace) = identity_layer(2, 2, 1);
    let input = [1.0, 2.0, 3.0, 4.0];

    let mut state = PassState::new(&mut workspace, Mode::Inference);
    layer.forward(&input, &mut state);
    layer.backward(&input, None, &mut state);
}

#[test]
#[should_panic(expected = "batch norm backward requires a preceding training forward")]
fn test_conv_batchnorm_second_backward_panics() {
    let (mut layer, mut workspace) = identity_layer(2, 2, 1);
    let input = [1.0, 2.0, 3.0, 4.0];

    let mut state = PassState::new(&mut workspace, Mode::Train);
    layer.forward(&input, &mut state);
    layer.backward(&input, None, &mut state);
    layer.backward(&input, None, &mut state);
}
