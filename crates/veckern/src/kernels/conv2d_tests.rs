    use super::*;
    use crate::kernels::ulp::assert_ulp_eq;
    use crate::kernels::Width;
    use proptest::prelude::*;

    /// 1..16 as a single-channel 4x4 image.
    fn sequential_4x4() -> Tensor {
        Tensor::from_vec(&[1, 1, 4, 4], (1..=16).map(|v| v as f32).collect()).unwrap()
    }

    /// Horizontal edge kernel `[[-1,-1,-1],[0,0,0],[1,1,1]]`.
    fn edge_kernel() -> Tensor {
        Tensor::from_vec(
            &[1, 1, 3, 3],
            vec![-1.0, -1.0, -1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0],
        )
        .unwrap()
    }

    const EDGE_PAD1: [f32; 16] = [
        11.0, 18.0, 21.0, 15.0, //
        16.0, 24.0, 24.0, 16.0, //
        16.0, 24.0, 24.0, 16.0, //
        -19.0, -30.0, -33.0, -23.0,
    ];

    fn pseudo(len: usize, salt: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (((i * 7919 + salt * 104_729) % 1999) as f32 / 999.5) - 1.0)
            .collect()
    }

    // ── Concrete edge-kernel scenario ────────────────────────────────────

    #[test]
    fn test_edge_kernel_pad1_every_variant() {
        let (x, k) = (sequential_4x4(), edge_kernel());
        let params = Conv2dParams {
            stride: (1, 1),
            padding: (1, 1),
        };
        for v in Variant::UNTILED {
            let mut y = Tensor::zeros(&[1, 1, 4, 4]);
            conv2d(v, &x, &k, None, params, &mut y).unwrap();
            assert_eq!(y.data(), &EDGE_PAD1, "direct {v}");

            let mut y3 = Tensor::zeros(&[1, 1, 4, 4]);
            conv2d_3x3(v, &x, &k, None, params, &mut y3).unwrap();
            assert_eq!(y3.data(), &EDGE_PAD1, "3x3 {v}");
        }
    }

    #[test]
    fn test_edge_kernel_pad0() {
        let (x, k) = (sequential_4x4(), edge_kernel());
        let mut y = Tensor::zeros(&[1, 1, 2, 2]);
        conv2d(Variant::Vector(Width::M1), &x, &k, None, Conv2dParams::default(), &mut y).unwrap();
        assert_eq!(y.data(), &[24.0, 24.0, 24.0, 24.0]);
    }

    // ── Shape law ─────────────────────────────────────────────────────────

    #[test]
    fn test_output_shape_law() {
        let (x, k) = (sequential_4x4(), edge_kernel());
        let padded = ConvGeometry::new(
            KernelOp::Conv2d,
            &x,
            &k,
            Conv2dParams {
                stride: (1, 1),
                padding: (1, 1),
            },
        )
        .unwrap();
        assert_eq!(padded.output_shape(), [1, 1, 4, 4]);
        let valid = ConvGeometry::new(KernelOp::Conv2d, &x, &k, Conv2dParams::default()).unwrap();
        assert_eq!(valid.output_shape(), [1, 1, 2, 2]);
        let strided = ConvGeometry::new(
            KernelOp::Conv2d,
            &Tensor::zeros(&[1, 1, 7, 6]),
            &k,
            Conv2dParams {
                stride: (2, 3),
                padding: (0, 1),
            },
        )
        .unwrap();
        // (7 - 3) / 2 + 1 = 3, (6 + 2 - 3) / 3 + 1 = 2
        assert_eq!(strided.output_shape(), [1, 1, 3, 2]);
    }

    #[test]
    fn test_wrong_output_shape_rejected() {
        let (x, k) = (sequential_4x4(), edge_kernel());
        let mut y = Tensor::zeros(&[1, 1, 4, 4]);
        let err = conv2d(Variant::Scalar, &x, &k, None, Conv2dParams::default(), &mut y).unwrap_err();
        assert!(matches!(err, KernelError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_kernel_larger_than_padded_input() {
        let x = Tensor::zeros(&[1, 1, 2, 2]);
        let k = Tensor::zeros(&[1, 1, 3, 3]);
        let mut y = Tensor::zeros(&[1, 1, 1, 1]);
        let err = conv2d(Variant::Scalar, &x, &k, None, Conv2dParams::default(), &mut y).unwrap_err();
        assert!(matches!(err, KernelError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_channel_mismatch() {
        let x = Tensor::zeros(&[1, 2, 4, 4]);
        let k = Tensor::zeros(&[1, 3, 3, 3]);
        let mut y = Tensor::zeros(&[1, 1, 2, 2]);
        assert!(matches!(
            conv2d(Variant::Scalar, &x, &k, None, Conv2dParams::default(), &mut y),
            Err(KernelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_zero_stride_rejected() {
        let (x, k) = (sequential_4x4(), edge_kernel());
        let mut y = Tensor::zeros(&[1, 1, 2, 2]);
        let params = Conv2dParams {
            stride: (0, 1),
            padding: (0, 0),
        };
        assert!(matches!(
            conv2d(Variant::Scalar, &x, &k, None, params, &mut y),
            Err(KernelError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_3x3_rejects_other_kernels() {
        let x = Tensor::zeros(&[1, 1, 6, 6]);
        let k = Tensor::zeros(&[1, 1, 5, 5]);
        let mut y = Tensor::zeros(&[1, 1, 2, 2]);
        assert!(matches!(
            conv2d_3x3(Variant::Scalar, &x, &k, None, Conv2dParams::default(), &mut y),
            Err(KernelError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_bias_added_per_output_channel() {
        let x = Tensor::from_vec(&[1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        // Two 1x1 kernels: identity and doubling.
        let k = Tensor::from_vec(&[2, 1, 1, 1], vec![1.0, 2.0]).unwrap();
        let b = Tensor::from_vec(&[2], vec![0.5, -1.0]).unwrap();
        let mut y = Tensor::zeros(&[1, 2, 2, 2]);
        conv2d(Variant::Vector(Width::M2), &x, &k, Some(&b), Conv2dParams::default(), &mut y).unwrap();
        assert_eq!(y.data(), &[1.5, 2.5, 3.5, 4.5, 1.0, 3.0, 5.0, 7.0]);
    }

    // ── Cross-variant equivalence ────────────────────────────────────────

    proptest! {
        #[test]
        fn prop_direct_variants_bit_identical(
            n in 1usize..3, cin in 1usize..4, cout in 1usize..3,
            h in 3usize..9, w in 3usize..40,
            kh in 1usize..4, kw in 1usize..4,
            sh in 1usize..3, sw in 1usize..3,
            ph in 0usize..2, pw in 0usize..2,
            salt in 0usize..100,
        ) {
            let x = Tensor::from_vec(&[n, cin, h, w], pseudo(n * cin * h * w, salt)).unwrap();
            let k = Tensor::from_vec(&[cout, cin, kh, kw], pseudo(cout * cin * kh * kw, salt + 1)).unwrap();
            let b = Tensor::from_vec(&[cout], pseudo(cout, salt + 2)).unwrap();
            let params = Conv2dParams { stride: (sh, sw), padding: (ph, pw) };
            let g = ConvGeometry::new(KernelOp::Conv2d, &x, &k, params).unwrap();
            let mut expected = Tensor::zeros(&g.output_shape());
            conv2d(Variant::Scalar, &x, &k, Some(&b), params, &mut expected).unwrap();
            for v in Variant::UNTILED {
                let mut y = Tensor::zeros(&g.output_shape());
                conv2d(v, &x, &k, Some(&b), params, &mut y).unwrap();
                assert_ulp_eq(y.data(), expected.data(), 0);
            }
        }

        #[test]
        fn prop_3x3_matches_direct(
            cin in 1usize..3, h in 3usize..8, w in 3usize..35,
            stride in 1usize..3, pad in 0usize..2, salt in 0usize..100,
        ) {
            let x = Tensor::from_vec(&[1, cin, h, w], pseudo(cin * h * w, salt)).unwrap();
            let k = Tensor::from_vec(&[2, cin, 3, 3], pseudo(2 * cin * 9, salt + 3)).unwrap();
            let params = Conv2dParams { stride: (stride, stride), padding: (pad, pad) };
            let g = ConvGeometry::new(KernelOp::Conv2d, &x, &k, params).unwrap();
            let mut direct = Tensor::zeros(&g.output_shape());
            conv2d(Variant::Scalar, &x, &k, None, params, &mut direct).unwrap();
            for v in Variant::UNTILED {
                let mut y = Tensor::zeros(&g.output_shape());
                conv2d_3x3(v, &x, &k, None, params, &mut y).unwrap();
                assert_ulp_eq(y.data(), direct.data(), 0);
            }
        }
    }
