    use super::*;
    use crate::kernels::Width;
    use proptest::prelude::*;

    /// Six boxes in two overlapping clusters plus one loner.
    fn cluster_boxes() -> Tensor {
        Tensor::from_vec(
            &[1, 6, 4],
            vec![
                0.0, 0.0, 1.0, 1.0, //
                0.0, 0.1, 1.0, 1.1, //
                0.0, -0.1, 1.0, 0.9, //
                0.0, 10.0, 1.0, 11.0, //
                0.0, 10.1, 1.0, 11.1, //
                0.0, 100.0, 1.0, 101.0,
            ],
        )
        .unwrap()
    }

    fn cluster_scores() -> Tensor {
        Tensor::from_vec(&[1, 1, 6], vec![0.9, 0.75, 0.6, 0.95, 0.5, 0.3]).unwrap()
    }

    fn run(v: Variant, boxes: &Tensor, scores: &Tensor, p: NmsParams) -> Vec<SelectedIndex> {
        let mut ws = NmsWorkspace::default();
        let mut out = Vec::new();
        nms_boxes(v, boxes, scores, p, &mut ws, &mut out).unwrap();
        out
    }

    fn box_ids(sel: &[SelectedIndex]) -> Vec<usize> {
        sel.iter().map(|s| s.box_index).collect()
    }

    // ── Box suppression ──────────────────────────────────────────────────

    #[test]
    fn test_suppress_by_iou() {
        for v in Variant::UNTILED {
            let sel = run(v, &cluster_boxes(), &cluster_scores(), NmsParams::new(3, 0.5, 0.0));
            assert_eq!(box_ids(&sel), vec![3, 0, 5], "variant {v}");
            assert!(sel.iter().all(|s| s.batch == 0 && s.class == 0));
        }
    }

    #[test]
    fn test_score_threshold_filters_candidates() {
        for v in Variant::UNTILED {
            let sel = run(v, &cluster_boxes(), &cluster_scores(), NmsParams::new(3, 0.5, 0.4));
            assert_eq!(box_ids(&sel), vec![3, 0], "variant {v}");
        }
    }

    #[test]
    fn test_score_equal_to_threshold_is_kept() {
        let sel = run(
            Variant::Vector(Width::M1),
            &cluster_boxes(),
            &cluster_scores(),
            NmsParams::new(10, 0.5, 0.3),
        );
        assert_eq!(box_ids(&sel), vec![3, 0, 5]);
    }

    #[test]
    fn test_max_output_zero_selects_nothing() {
        for v in Variant::UNTILED {
            assert!(run(v, &cluster_boxes(), &cluster_scores(), NmsParams::new(0, 0.5, 0.0)).is_empty());
        }
    }

    #[test]
    fn test_center_point_format() {
        let boxes = Tensor::from_vec(
            &[1, 6, 4],
            vec![
                0.5, 0.5, 1.0, 1.0, //
                0.5, 0.6, 1.0, 1.0, //
                0.5, 0.4, 1.0, 1.0, //
                0.5, 10.5, 1.0, 1.0, //
                0.5, 10.6, 1.0, 1.0, //
                0.5, 100.5, 1.0, 1.0,
            ],
        )
        .unwrap();
        let p = NmsParams {
            center_point_box: true,
            ..NmsParams::new(3, 0.5, 0.0)
        };
        for v in Variant::UNTILED {
            assert_eq!(box_ids(&run(v, &boxes, &cluster_scores(), p)), vec![3, 0, 5], "variant {v}");
        }
    }

    #[test]
    fn test_flipped_corners_normalized() {
        let mut flipped = cluster_boxes().into_vec();
        for b in flipped.chunks_exact_mut(4) {
            b.swap(0, 2);
            b.swap(1, 3);
        }
        let boxes = Tensor::from_vec(&[1, 6, 4], flipped).unwrap();
        let sel = run(Variant::Scalar, &boxes, &cluster_scores(), NmsParams::new(3, 0.5, 0.0));
        assert_eq!(box_ids(&sel), vec![3, 0, 5]);
    }

    #[test]
    fn test_equal_scores_tie_break_by_index() {
        let boxes = Tensor::from_vec(
            &[1, 3, 4],
            vec![0.0, 0.0, 1.0, 1.0, 5.0, 5.0, 6.0, 6.0, 9.0, 9.0, 10.0, 10.0],
        )
        .unwrap();
        let scores = Tensor::from_vec(&[1, 1, 3], vec![0.5, 0.5, 0.9]).unwrap();
        for v in Variant::UNTILED {
            assert_eq!(box_ids(&run(v, &boxes, &scores, NmsParams::new(5, 0.5, 0.0))), vec![2, 0, 1]);
        }
    }

    #[test]
    fn test_zero_area_boxes_never_suppress() {
        // Two identical degenerate boxes: IoU is 0, so both survive.
        let boxes = Tensor::from_vec(&[1, 2, 4], vec![1.0, 1.0, 1.0, 3.0, 1.0, 1.0, 1.0, 3.0]).unwrap();
        let scores = Tensor::from_vec(&[1, 1, 2], vec![0.9, 0.8]).unwrap();
        for v in Variant::UNTILED {
            assert_eq!(box_ids(&run(v, &boxes, &scores, NmsParams::new(5, 0.0, 0.0))), vec![0, 1]);
        }
        assert_eq!(iou([0.0, 0.0, 0.0, 1.0], 0.0, [0.0, 0.0, 0.0, 1.0], 0.0), 0.0);
    }

    #[test]
    fn test_output_order_batch_then_class() {
        let mut b = cluster_boxes().into_vec();
        b.extend(cluster_boxes().into_vec());
        let boxes = Tensor::from_vec(&[2, 6, 4], b).unwrap();
        let mut s = cluster_scores().into_vec();
        s.extend([0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
        s.extend(cluster_scores().into_vec());
        s.extend([0.6, 0.5, 0.4, 0.3, 0.2, 0.1]);
        let scores = Tensor::from_vec(&[2, 2, 6], s).unwrap();
        let sel = run(Variant::Vector(Width::M4), &boxes, &scores, NmsParams::new(1, 0.5, 0.0));
        let triples: Vec<(usize, usize, usize)> = sel.iter().map(|s| (s.batch, s.class, s.box_index)).collect();
        assert_eq!(triples, vec![(0, 0, 3), (0, 1, 5), (1, 0, 3), (1, 1, 0)]);

        let t = selected_to_tensor(&sel).unwrap();
        assert_eq!(t.shape(), &[4, 3]);
        assert_eq!(&t.data()[3..6], &[0, 1, 5]);
    }

    #[test]
    fn test_selected_to_tensor_empty_and_wide() {
        let empty = selected_to_tensor(&[]).unwrap();
        assert_eq!(empty.shape(), &[0, 3]);
        let too_wide = SelectedIndex {
            batch: 0,
            class: 0,
            box_index: usize::MAX,
        };
        assert!(matches!(
            selected_to_tensor(&[too_wide]),
            Err(KernelError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_parameter_and_shape_errors() {
        let mut ws = NmsWorkspace::with_capacity(6);
        let mut out = vec![SelectedIndex {
            batch: 9,
            class: 9,
            box_index: 9,
        }];
        let bad_iou = NmsParams::new(3, 1.5, 0.0);
        assert!(matches!(
            nms_boxes(Variant::Scalar, &cluster_boxes(), &cluster_scores(), bad_iou, &mut ws, &mut out),
            Err(KernelError::InvalidConfiguration { .. })
        ));
        let scores_wrong = Tensor::zeros(&[1, 1, 5]);
        assert!(matches!(
            nms_boxes(Variant::Scalar, &cluster_boxes(), &scores_wrong, NmsParams::new(3, 0.5, 0.0), &mut ws, &mut out),
            Err(KernelError::ShapeMismatch { .. })
        ));
        let boxes_wrong = Tensor::zeros(&[1, 6, 3]);
        assert!(matches!(
            nms_boxes(Variant::Scalar, &boxes_wrong, &cluster_scores(), NmsParams::new(3, 0.5, 0.0), &mut ws, &mut out),
            Err(KernelError::ShapeMismatch { .. })
        ));
        // Failed calls leave the caller's output alone.
        assert_eq!(out.len(), 1);
    }

    // ── 1D local maxima ──────────────────────────────────────────────────

    fn nms1(v: Variant, x: &[f32]) -> Vec<f32> {
        let input = Tensor::from_vec(&[x.len()], x.to_vec()).unwrap();
        let mut y = Tensor::from_vec(&[x.len()], vec![f32::NAN; x.len()]).unwrap();
        nms_1d(v, &input, &mut y).unwrap();
        y.into_vec()
    }

    #[test]
    fn test_1d_known_answer() {
        for v in Variant::UNTILED {
            assert_eq!(nms1(v, &[1.0, 3.0, 2.0, 2.0, 5.0, 4.0]), vec![0.0, 3.0, 0.0, 0.0, 5.0, 0.0], "variant {v}");
        }
    }

    #[test]
    fn test_1d_plateau_survives() {
        for v in Variant::UNTILED {
            assert_eq!(nms1(v, &[1.0, 2.0, 2.0, 1.0]), vec![0.0, 2.0, 2.0, 0.0]);
        }
    }

    #[test]
    fn test_1d_boundaries() {
        for v in Variant::UNTILED {
            assert_eq!(nms1(v, &[7.0]), vec![7.0]);
            assert_eq!(nms1(v, &[3.0, 1.0]), vec![3.0, 0.0]);
            assert_eq!(nms1(v, &[-1.0, -1.0]), vec![-1.0, -1.0]);
            assert!(nms1(v, &[]).is_empty());
        }
    }

    #[test]
    fn test_1d_rejects_rank_2() {
        let x = Tensor::zeros(&[2, 2]);
        let mut y = Tensor::zeros(&[2, 2]);
        assert!(matches!(
            nms_1d(Variant::Scalar, &x, &mut y),
            Err(KernelError::ShapeMismatch { .. })
        ));
    }

    // ── Cross-variant equivalence ────────────────────────────────────────

    proptest! {
        #[test]
        fn prop_box_variants_identical(
            raw in proptest::collection::vec(0.0f32..20.0, 4 * 48),
            scores in proptest::collection::vec(0.0f32..1.0, 2 * 48),
            m in 1usize..48, iou_t in 0.0f32..1.0, score_t in 0.0f32..0.5,
        ) {
            let boxes = Tensor::from_vec(&[1, m, 4], raw[..4 * m].to_vec()).unwrap();
            let mut s = scores[..m].to_vec();
            s.extend_from_slice(&scores[48..48 + m]);
            let scores = Tensor::from_vec(&[1, 2, m], s).unwrap();
            let p = NmsParams::new(m, iou_t, score_t);
            let expected = run(Variant::Scalar, &boxes, &scores, p);
            for v in &Variant::UNTILED[1..] {
                prop_assert_eq!(&run(*v, &boxes, &scores, p), &expected);
            }
        }

        #[test]
        fn prop_1d_variants_identical(x in proptest::collection::vec(-3i8..3, 0..80)) {
            let x: Vec<f32> = x.into_iter().map(f32::from).collect();
            let expected = nms1(Variant::Scalar, &x);
            for v in &Variant::UNTILED[1..] {
                prop_assert_eq!(&nms1(*v, &x), &expected);
            }
        }
    }
