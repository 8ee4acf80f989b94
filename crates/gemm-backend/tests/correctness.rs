// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Every implementation against a naive reference.

use cpu_info::{CpuInfo, CpuIsa};
use gemm_backend::{
    gemm, Activation, ConvolutionParameters, GemmArgs, GemmArrays, GemmCommon, GemmConfig, GemmMethod, NdCoord,
    Nothing, Requantize32, WeightFormat,
};
use proptest::prelude::*;

fn cpu(isa: CpuIsa, threads: usize) -> CpuInfo {
    CpuInfo::with_isa(isa, threads)
}

/// Zeroed, 8-byte aligned bytes for working space and packed `B`.
struct Scratch(Vec<u64>);

impl Scratch {
    fn new(bytes: usize) -> Self {
        Self(vec![0; bytes.div_ceil(8)])
    }

    fn as_mut_ptr(&mut self) -> *mut u8 {
        self.0.as_mut_ptr().cast()
    }
}

fn data(len: usize, seed: usize) -> Vec<f32> {
    (0..len).map(|i| (((i * 7 + seed * 13) % 11) as f32 - 5.0) * 0.25).collect()
}

/// C[multi][batch] = A[multi][batch] * B[multi], all row-major and dense.
fn reference(a: &[f32], b: &[f32], m: usize, n: usize, k: usize, batches: usize, multis: usize) -> Vec<f32> {
    let mut c = vec![0.0f32; multis * batches * m * n];
    for mu in 0..multis {
        for ba in 0..batches {
            for i in 0..m {
                for j in 0..n {
                    let mut acc = 0.0;
                    for kk in 0..k {
                        acc += a[((mu * batches + ba) * m + i) * k + kk] * b[(mu * k + kk) * n + j];
                    }
                    c[((mu * batches + ba) * m + i) * n + j] = acc;
                }
            }
        }
    }
    c
}

/// Runs `g` over its whole window, split into `pieces` contiguous chunks of dimension 0.
fn run_in_pieces(g: &dyn GemmCommon<f32, f32, f32>, pieces: usize) {
    let window = g.get_window_size();
    let total = window.get_size(0);
    let chunk = total.div_ceil(pieces.max(1)).max(1);
    let mut start = 0;
    let mut thread = 0;
    while start < total {
        let len = chunk.min(total - start);
        let mut dims = vec![(start, len)];
        if window.get_size(1) > 1 {
            dims.push((0, window.get_size(1)));
        }
        let work = NdCoord::new(&dims);
        g.execute(&work, &NdCoord::default(), thread % pieces.max(1));
        start += len;
        thread += 1;
    }
}

fn check_fp32(method: GemmMethod, m: usize, n: usize, k: usize, batches: usize, multis: usize, threads: usize) {
    let a = data(multis * batches * m * k, 1);
    let b = data(multis * k * n, 2);
    let mut c = vec![f32::NAN; multis * batches * m * n];

    let args = GemmArgs::new(cpu(CpuIsa::default(), threads), m, n, k)
        .with_batches(batches, multis)
        .with_config(GemmConfig::with_method(method));
    let mut g = gemm::<f32, f32, f32, _>(&args, &Nothing).expect("an implementation");
    assert_eq!(g.get_config().method, method);

    let mut ws = Scratch::new(g.get_working_size());
    let mut packed = Scratch::new(g.get_b_pretransposed_array_size());
    g.set_working_space(ws.as_mut_ptr());
    g.set_arrays(GemmArrays {
        a: a.as_ptr(),
        lda: k,
        a_batch_stride: m * k,
        a_multi_stride: batches * m * k,
        c: c.as_mut_ptr(),
        ldc: n,
        c_batch_stride: m * n,
        c_multi_stride: batches * m * n,
        ..GemmArrays::default()
    });
    if g.b_pretranspose_required() {
        g.pretranspose_b_array(packed.as_mut_ptr(), b.as_ptr(), n, k * n, false);
    }
    run_in_pieces(g.as_ref(), threads);

    let expected = reference(&a, &b, m, n, k, batches, multis);
    for (i, (got, want)) in c.iter().zip(&expected).enumerate() {
        assert!((got - want).abs() < 1e-3, "{method} element {i}: {got} != {want}");
    }
}

#[test]
fn test_hybrid_matches_reference() {
    check_fp32(GemmMethod::GemmHybrid, 13, 37, 9, 2, 2, 3);
    check_fp32(GemmMethod::GemmHybrid, 70, 100, 130, 1, 1, 4);
}

#[test]
fn test_interleaved_matches_reference() {
    check_fp32(GemmMethod::GemmInterleaved, 17, 25, 11, 2, 3, 2);
}

#[test]
fn test_interleaved_2d_matches_reference() {
    check_fp32(GemmMethod::GemmInterleaved2d, 20, 30, 7, 1, 2, 2);
}

#[test]
fn test_gemv_batched_matches_reference() {
    check_fp32(GemmMethod::GemvBatched, 1, 19, 23, 5, 1, 2);
}

/// Executes a freshly built `method` kernel without packing `B` first.
fn execute_unpacked(method: GemmMethod) {
    let (m, n, k) = (8, 16, 4);
    let a = data(m * k, 1);
    let mut c = vec![0.0f32; m * n];
    let args = GemmArgs::new(cpu(CpuIsa::default(), 1), m, n, k).with_config(GemmConfig::with_method(method));
    let mut g = gemm::<f32, f32, f32, _>(&args, &Nothing).expect("an implementation");
    assert!(g.b_pretranspose_required());
    let mut ws = Scratch::new(g.get_working_size());
    g.set_working_space(ws.as_mut_ptr());
    g.set_arrays(GemmArrays {
        a: a.as_ptr(),
        lda: k,
        c: c.as_mut_ptr(),
        ldc: n,
        ..GemmArrays::default()
    });
    run_in_pieces(g.as_ref(), 1);
}

#[test]
#[should_panic(expected = "B has not been pretransposed")]
fn test_hybrid_refuses_unpacked_b() {
    execute_unpacked(GemmMethod::GemmHybrid);
}

#[test]
#[should_panic(expected = "B has not been pretransposed")]
fn test_interleaved_refuses_unpacked_b() {
    execute_unpacked(GemmMethod::GemmInterleaved);
}

#[test]
fn test_pretranspose_in_parts() {
    let (m, n, k) = (5, 40, 6);
    let a = data(m * k, 3);
    let b = data(k * n, 4);
    let mut c = vec![0.0f32; m * n];
    let args = GemmArgs::new(cpu(CpuIsa::default(), 1), m, n, k);
    let mut g = gemm::<f32, f32, f32, _>(&args, &Nothing).expect("an implementation");
    let mut packed = Scratch::new(g.get_b_pretransposed_array_size());
    let pieces = g.get_b_pretranspose_window_size();
    assert!(pieces > 1);
    for p in (0..pieces).rev() {
        g.pretranspose_b_array_part(packed.as_mut_ptr(), b.as_ptr(), n, 0, false, p, p + 1);
    }
    g.set_arrays(GemmArrays {
        a: a.as_ptr(),
        lda: k,
        c: c.as_mut_ptr(),
        ldc: n,
        ..GemmArrays::default()
    });
    g.execute_all();
    let expected = reference(&a, &b, m, n, k, 1, 1);
    assert!(c.iter().zip(&expected).all(|(x, y)| (x - y).abs() < 1e-4));
}

#[test]
fn test_reattached_buffer_is_reused() {
    let (m, n, k) = (3, 8, 4);
    let a = data(m * k, 5);
    let b = data(k * n, 6);
    let mut c = vec![0.0f32; m * n];
    let args = GemmArgs::new(cpu(CpuIsa::default(), 1), m, n, k);

    let first = gemm::<f32, f32, f32, _>(&args, &Nothing).expect("an implementation");
    let mut packed = Scratch::new(first.get_b_pretransposed_array_size());
    first.pretranspose_b_array(packed.as_mut_ptr(), b.as_ptr(), n, 0, false);

    let mut second = gemm::<f32, f32, f32, _>(&args, &Nothing).expect("an implementation");
    assert!(second.b_pretranspose_required());
    second.set_pretransposed_b_data(packed.as_mut_ptr());
    assert!(!second.b_pretranspose_required());
    second.set_arrays(GemmArrays {
        a: a.as_ptr(),
        lda: k,
        c: c.as_mut_ptr(),
        ldc: n,
        ..GemmArrays::default()
    });
    second.execute_all();
    let expected = reference(&a, &b, m, n, k, 1, 1);
    assert!(c.iter().zip(&expected).all(|(x, y)| (x - y).abs() < 1e-4));
}

#[test]
fn test_transposed_b_bias_and_activation() {
    let (m, n, k) = (4, 6, 5);
    let a = data(m * k, 7);
    let b = data(k * n, 8);
    let mut bt = vec![0.0f32; n * k];
    for kk in 0..k {
        for j in 0..n {
            bt[j * k + kk] = b[kk * n + j];
        }
    }
    let bias: Vec<f32> = (0..n).map(|j| j as f32 - 2.0).collect();
    let mut c = vec![0.0f32; m * n];
    let act = Activation::BoundedReLU {
        param1: 1.5,
        param2: 0.0,
    };
    let args = GemmArgs::new(cpu(CpuIsa::default(), 1), m, n, k).with_activation(act);
    let mut g = gemm::<f32, f32, f32, _>(&args, &Nothing).expect("an implementation");
    assert!(g.b_pretranspose_supports_transpose());
    let mut packed = Scratch::new(g.get_b_pretransposed_array_size());
    g.pretranspose_b_array(packed.as_mut_ptr(), bt.as_ptr(), k, 0, true);
    g.set_arrays(GemmArrays {
        a: a.as_ptr(),
        lda: k,
        c: c.as_mut_ptr(),
        ldc: n,
        bias: bias.as_ptr(),
        ..GemmArrays::default()
    });
    g.execute_all();

    let expected = reference(&a, &b, m, n, k, 1, 1);
    for i in 0..m {
        for j in 0..n {
            let want = act.apply(expected[i * n + j] + bias[j]);
            assert!((c[i * n + j] - want).abs() < 1e-4);
        }
    }
}

#[test]
fn test_indirect_input() {
    let (m, n, k) = (3, 5, 4);
    let a = data(m * k, 9);
    let b = data(k * n, 10);
    let mut c = vec![0.0f32; m * n];

    // Rows in reverse order through the pointer table.
    let rows: Vec<*const f32> = (0..m).map(|i| a[(m - 1 - i) * k..].as_ptr()).collect();
    let sections: Vec<*const *const f32> = vec![rows.as_ptr()];

    let args = GemmArgs::new(cpu(CpuIsa::default(), 1), m, n, k).with_sections(1, true);
    let mut g = gemm::<f32, f32, f32, _>(&args, &Nothing).expect("an implementation");
    assert_eq!(g.get_config().method, GemmMethod::GemmHybrid);
    let mut packed = Scratch::new(g.get_b_pretransposed_array_size());
    g.pretranspose_b_array(packed.as_mut_ptr(), b.as_ptr(), n, 0, false);
    g.set_indirect_parameters(k, sections.as_ptr());
    g.set_arrays(GemmArrays {
        c: c.as_mut_ptr(),
        ldc: n,
        ..GemmArrays::default()
    });
    g.execute_all();

    let expected = reference(&a, &b, m, n, k, 1, 1);
    for i in 0..m {
        for j in 0..n {
            assert!((c[i * n + j] - expected[(m - 1 - i) * n + j]).abs() < 1e-4);
        }
    }
}

#[test]
fn test_convolution_input() {
    // 4x4 input with 2 channels, 3x3 kernel, stride 1, padding 1, 3 output channels.
    let (ih, iw, ic, oc) = (4usize, 4usize, 2usize, 3usize);
    let input = data(ih * iw * ic, 11);
    let weights = data(9 * ic * oc, 12); // rows (ky, kx, c), columns oc
    let mut out = vec![0.0f32; ih * iw * oc];
    let params = ConvolutionParameters {
        input_width: iw,
        input_height: ih,
        input_channels: ic,
        kernel_width: 3,
        kernel_height: 3,
        output_width: iw,
        output_height: ih,
        output_stride_w: 1,
        output_stride_h: 1,
        padding_top: 1,
        padding_left: 1,
        padding_value: 0.0,
    };
    let args = GemmArgs::new(cpu(CpuIsa::default(), 1), ih * iw, oc, ic).with_sections(9, false);
    let mut g = gemm::<f32, f32, f32, _>(&args, &Nothing).expect("an implementation");
    g.set_convolution_parameters(params);
    let mut packed = Scratch::new(g.get_b_pretransposed_array_size());
    g.pretranspose_b_array(packed.as_mut_ptr(), weights.as_ptr(), oc, 0, false);
    g.set_arrays(GemmArrays {
        a: input.as_ptr(),
        lda: ic,
        c: out.as_mut_ptr(),
        ldc: oc,
        ..GemmArrays::default()
    });
    g.execute_all();

    for oy in 0..ih {
        for ox in 0..iw {
            for o in 0..oc {
                let mut acc = 0.0;
                for ky in 0..3 {
                    for kx in 0..3 {
                        let (iy, ix) = (oy as isize + ky as isize - 1, ox as isize + kx as isize - 1);
                        if iy < 0 || ix < 0 || iy >= ih as isize || ix >= iw as isize {
                            continue;
                        }
                        for ch in 0..ic {
                            let x = input[(iy as usize * iw + ix as usize) * ic + ch];
                            let w = weights[((ky * 3 + kx) * ic + ch) * oc + o];
                            acc += x * w;
                        }
                    }
                }
                let got = out[(oy * iw + ox) * oc + o];
                assert!((got - acc).abs() < 1e-3, "({oy},{ox},{o}): {got} != {acc}");
            }
        }
    }
}

#[test]
fn test_fixed_format_reads_b_directly() {
    let (m, n, k) = (3, 8, 5);
    let a = data(m * k, 13);
    let b = data(k * n, 14);
    // OHWIo4: stripes of 4 columns, each stripe k rows of 4 values.
    let sw = 4;
    let mut blocked = vec![0.0f32; n.div_ceil(sw) * k * sw];
    for kk in 0..k {
        for j in 0..n {
            blocked[(j / sw) * k * sw + kk * sw + j % sw] = b[kk * n + j];
        }
    }
    let mut c = vec![0.0f32; m * n];
    let args = GemmArgs::new(cpu(CpuIsa::default(), 1), m, n, k).with_fixed_format(true, WeightFormat::Ohwio4);
    let mut g = gemm::<f32, f32, f32, _>(&args, &Nothing).expect("an implementation");
    assert!(!g.b_pretranspose_required());
    assert_eq!(g.get_config().weight_format, WeightFormat::Ohwio4);
    g.set_arrays(GemmArrays {
        a: a.as_ptr(),
        lda: k,
        b: blocked.as_ptr(),
        ldb: k * sw,
        c: c.as_mut_ptr(),
        ldc: n,
        ..GemmArrays::default()
    });
    g.execute_all();
    let expected = reference(&a, &b, m, n, k, 1, 1);
    assert!(c.iter().zip(&expected).all(|(x, y)| (x - y).abs() < 1e-4));
}

/// Zero-point corrected integer product, requantized with one multiplier.
fn requant_reference(a: &[u8], b: &[u8], m: usize, n: usize, k: usize, za: i32, zb: i32, rq: &Requantize32) -> Vec<u8> {
    let mut out = vec![0u8; m * n];
    for i in 0..m {
        for j in 0..n {
            let mut acc = 0i32;
            for kk in 0..k {
                acc += (a[i * k + kk] as i32 - za) * (b[kk * n + j] as i32 - zb);
            }
            out[i * n + j] = rq.requantize(acc, j) as u8;
        }
    }
    out
}

fn run_requantized(isa: CpuIsa, method: GemmMethod, m: usize, n: usize, k: usize, za: i32, zb: i32) {
    let a: Vec<u8> = (0..m * k).map(|i| ((i * 37 + 11) % 256) as u8).collect();
    let b: Vec<u8> = (0..k * n).map(|i| ((i * 53 + 7) % 256) as u8).collect();
    let rq = Requantize32::per_layer(-za, -zb, 3, -10, 1_518_500_250, 0, 255);
    let mut c = vec![0u8; m * n];

    let args = GemmArgs::new(cpu(isa, 1), m, n, k).with_config(GemmConfig::with_method(method));
    let mut g = gemm::<u8, u8, u8, _>(&args, &rq).expect("an implementation");
    let mut ws = Scratch::new(g.get_working_size());
    let mut packed = Scratch::new(g.get_b_pretransposed_array_size());
    g.set_working_space(ws.as_mut_ptr());
    g.pretranspose_b_array(packed.as_mut_ptr(), b.as_ptr(), n, 0, false);
    g.set_arrays(GemmArrays {
        a: a.as_ptr(),
        lda: k,
        c: c.as_mut_ptr(),
        ldc: n,
        ..GemmArrays::default()
    });
    g.execute_all();

    assert_eq!(c, requant_reference(&a, &b, m, n, k, za, zb, &rq), "{method}");
}

#[test]
fn test_requantized_hybrid_and_interleaved() {
    run_requantized(CpuIsa::armv82_dot(), GemmMethod::GemmHybrid, 7, 20, 33, 128, 121);
    run_requantized(CpuIsa::default(), GemmMethod::GemmInterleaved, 9, 13, 17, 3, 250);
}

#[test]
fn test_quantized_bias_changes_output() {
    let (m, n, k) = (2, 4, 3);
    let a = vec![1u8; m * k];
    let b = vec![1u8; k * n];
    let rq = Requantize32::per_layer(0, 0, 0, 0, i32::MAX, 0, 255);
    let args = GemmArgs::new(cpu(CpuIsa::armv82_dot(), 1), m, n, k);
    let mut g = gemm::<u8, u8, u8, _>(&args, &rq).expect("an implementation");
    g.set_quantized_bias(&[10, 20, 30, 40], 0);
    let mut packed = Scratch::new(g.get_b_pretransposed_array_size());
    g.pretranspose_b_array(packed.as_mut_ptr(), b.as_ptr(), n, 0, false);
    let mut c = vec![0u8; m * n];
    g.set_arrays(GemmArrays {
        a: a.as_ptr(),
        lda: k,
        c: c.as_mut_ptr(),
        ldc: n,
        ..GemmArrays::default()
    });
    g.execute_all();
    assert_eq!(&c[..4], &[13, 23, 33, 43]);
}

#[test]
fn test_u8_raw_accumulation() {
    let (m, n, k) = (3, 5, 70);
    let a: Vec<u8> = (0..m * k).map(|i| (i % 256) as u8).collect();
    let b: Vec<u8> = (0..k * n).map(|i| (255 - i % 256) as u8).collect();
    let mut c = vec![0u32; m * n];
    let args = GemmArgs::new(cpu(CpuIsa::default(), 1), m, n, k);
    let mut g = gemm::<u8, u8, u32, _>(&args, &Nothing).expect("portable interleaved");
    let mut ws = Scratch::new(g.get_working_size());
    let mut packed = Scratch::new(g.get_b_pretransposed_array_size());
    g.set_working_space(ws.as_mut_ptr());
    g.pretranspose_b_array(packed.as_mut_ptr(), b.as_ptr(), n, 0, false);
    g.set_arrays(GemmArrays {
        a: a.as_ptr(),
        lda: k,
        c: c.as_mut_ptr(),
        ldc: n,
        ..GemmArrays::default()
    });
    g.execute_all();
    for i in 0..m {
        for j in 0..n {
            let want: u32 = (0..k).map(|kk| a[i * k + kk] as u32 * b[kk * n + j] as u32).sum();
            assert_eq!(c[i * n + j], want);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_hybrid_any_shape(m in 1usize..20, n in 1usize..40, k in 1usize..20, threads in 1usize..4) {
        check_fp32(GemmMethod::GemmHybrid, m, n, k, 1, 1, threads);
    }

    #[test]
    fn prop_interleaved_any_shape(m in 1usize..20, n in 1usize..40, k in 1usize..20) {
        check_fp32(GemmMethod::GemmInterleaved, m, n, k, 1, 1, 1);
    }
}
